use std::sync::Arc;

use common::admin_http::{join_admin_server, spawn_admin_server};
use common::utils::logging::{init_logging, LogFormat};
use configs::AppConfig;
use dotenvy::dotenv;
use notification::{DocumentStore, JsonDocumentStore, NotificationService};
use server::{ServeBuilder, Service};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

async fn run(cfg: AppConfig, service_id: Uuid) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    // Ctrl+C 触发优雅停机：停止接收新连接，等待进行中的请求完成
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!(service = "companion", event = "shutdown_signal", %service_id, "received Ctrl+C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(service = "companion", event = "signal_failed", error = %e, "cannot listen for Ctrl+C"),
            }
        }
    });

    let admin = match cfg.server.admin_addr.as_deref() {
        Some(addr) => Some(
            spawn_admin_server(addr, multiplexer::observability::encode_metrics, shutdown.clone()).await?,
        ),
        None => None,
    };

    let store: Arc<dyn DocumentStore> = match cfg.store.path.as_deref() {
        Some(path) => Arc::new(JsonDocumentStore::open(path).await?),
        None => Arc::new(JsonDocumentStore::in_memory()),
    };
    let notification = NotificationService::new(store, cfg.store.collection_prefix.clone()).await?;

    let serve_cfg = ServeBuilder::from_config(&cfg)
        .service(Arc::new(notification) as Arc<dyn Service>)
        .on_listen(move |addr| {
            info!(service = "companion", event = "listening", %service_id, %addr, "companion ready");
        })
        .on_exit(move || {
            info!(service = "companion", event = "exit", %service_id, "companion server exited");
        })
        .build()?;

    let result = server::serve(serve_cfg, shutdown.clone()).await;

    // 主服务退出后同时停止 admin 监听
    shutdown.cancel();
    if let Some((_, handle)) = admin {
        join_admin_server(handle).await;
    }
    result.map_err(Into::into)
}

fn main() -> std::process::ExitCode {
    // 提前加载 .env，使得 RUST_LOG / PORT 等环境变量生效
    dotenv().ok();

    let cfg = AppConfig::load_and_validate();
    let format = cfg.as_ref().map(|c| LogFormat::from_name(&c.log.format)).unwrap_or(LogFormat::Compact);
    init_logging(format);

    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(service = "companion", event = "config_invalid", error = %e, "failed to load configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    let service_id = Uuid::new_v4();
    let pid = std::process::id();
    let version = env!("CARGO_PKG_VERSION");

    std::panic::set_hook(Box::new(move |info| {
        error!(
            service = "companion",
            event = "panic",
            %service_id,
            pid,
            message = %info,
            "unhandled panic occurred"
        );
    }));

    let worker_threads = cfg.server.worker_threads;
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(w) = worker_threads {
        builder.worker_threads(w);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "companion", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return std::process::ExitCode::FAILURE;
        }
    };

    info!(
        service = "companion",
        event = "start",
        %service_id,
        pid,
        version,
        threads = worker_threads.unwrap_or_default(),
        "companion starting"
    );

    match rt.block_on(run(cfg, service_id)) {
        Ok(()) => {
            info!(service = "companion", event = "stop", %service_id, pid, "companion stopped normally");
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            error!(service = "companion", event = "run_failed", %service_id, error = %e, "companion stopped with error");
            std::process::ExitCode::FAILURE
        }
    }
}
