//! Protobuf descriptors of `notification.v1`, assembled by hand since the
//! messages are hand-written too. Served through gRPC reflection.

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, MessageOptions,
    MethodDescriptorProto, ServiceDescriptorProto,
};

pub const FILE_NAME: &str = "notification/v1/notification.proto";
pub const EMPTY_FILE_NAME: &str = "google/protobuf/empty.proto";

const PACKAGE: &str = "notification.v1";
const EMPTY: &str = ".google.protobuf.Empty";

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn field(name: &str, number: i32, label: Label, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

fn string(name: &str, number: i32) -> FieldDescriptorProto {
    field(name, number, Label::Optional, Type::String)
}

fn message_ref(name: &str, number: i32, label: Label, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(format!(".{PACKAGE}.{type_name}")),
        ..field(name, number, label, Type::Message)
    }
}

/// `map<string, string>` field plus the synthetic entry message protoc emits.
fn string_map(owner: &str, name: &str, number: i32) -> (FieldDescriptorProto, DescriptorProto) {
    let mut entry_name = json_name(name);
    if let Some(first) = entry_name.get(..1) {
        entry_name = format!("{}{}Entry", first.to_uppercase(), &entry_name[1..]);
    }
    let entry = DescriptorProto {
        name: Some(entry_name.clone()),
        field: vec![string("key", 1), string("value", 2)],
        options: Some(MessageOptions { map_entry: Some(true), ..Default::default() }),
        ..Default::default()
    };
    let field = message_ref(name, number, Label::Repeated, &format!("{owner}.{entry_name}"));
    (field, entry)
}

fn message(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto { name: Some(name.to_string()), field, ..Default::default() }
}

fn with_map(name: &str, mut fields: Vec<FieldDescriptorProto>, map: &str, number: i32) -> DescriptorProto {
    let (map_field, entry) = string_map(name, map, number);
    fields.push(map_field);
    DescriptorProto { nested_type: vec![entry], ..message(name, fields) }
}

fn method(name: &str, input: &str, output: Option<&str>) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".{PACKAGE}.{input}")),
        output_type: Some(match output {
            Some(out) => format!(".{PACKAGE}.{out}"),
            None => EMPTY.to_string(),
        }),
        ..Default::default()
    }
}

/// `notification/v1/notification.proto`: the messages in [`crate::messages`]
/// and the `NotificationService` methods served by [`crate::grpc`].
pub fn file_descriptor() -> FileDescriptorProto {
    let message_type = vec![
        with_map(
            "AppInstance",
            vec![string("instance_id", 1), string("token", 2)],
            "labels",
            3,
        ),
        message("RemoveTokenRequest", vec![string("instance_id", 1)]),
        message("RemoveInstanceRequest", vec![string("instance_id", 1)]),
        with_map("Notification", vec![string("title", 1), string("body", 2)], "data", 3),
        message(
            "SendRequest",
            vec![
                string("instance_id", 1),
                message_ref("notification", 2, Label::Optional, "Notification"),
            ],
        ),
        message("SendAllRequest", vec![message_ref("messages", 1, Label::Repeated, "SendRequest")]),
        message(
            "SendMulticastRequest",
            vec![
                field("instance_ids", 1, Label::Repeated, Type::String),
                message_ref("notification", 2, Label::Optional, "Notification"),
            ],
        ),
        message("ListNotificationsRequest", vec![string("instance_id", 1)]),
        message(
            "NotificationList",
            vec![message_ref("notifications", 1, Label::Repeated, "Notification")],
        ),
    ];

    let service = ServiceDescriptorProto {
        name: Some("NotificationService".to_string()),
        method: vec![
            method("PutInstance", "AppInstance", None),
            method("RemoveToken", "RemoveTokenRequest", None),
            method("RemoveInstance", "RemoveInstanceRequest", None),
            method("Send", "SendRequest", None),
            method("SendAll", "SendAllRequest", None),
            method("SendMulticast", "SendMulticastRequest", None),
            method("ListNotifications", "ListNotificationsRequest", Some("NotificationList")),
        ],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some(FILE_NAME.to_string()),
        package: Some(PACKAGE.to_string()),
        dependency: vec![EMPTY_FILE_NAME.to_string()],
        message_type,
        service: vec![service],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// `google/protobuf/empty.proto`, the response type of most methods.
pub fn empty_file_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(EMPTY_FILE_NAME.to_string()),
        package: Some("google.protobuf".to_string()),
        message_type: vec![message("Empty", Vec::new())],
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}
