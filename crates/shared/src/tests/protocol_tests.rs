use super::*;
use chrono::TimeZone;

fn received_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("timestamp")
}

#[test]
fn message_new_accepts_nested_and_bare_shapes() {
    let nested = json!({
        "conversationId": "c1",
        "message": {
            "_id": "m1",
            "sender": { "_id": "u2" },
            "content": "hello",
            "createdAt": "2024-05-01T10:00:00Z"
        }
    });
    let bare = json!({
        "id": "m1",
        "conversationId": "c1",
        "senderId": "u2",
        "content": "hello",
        "createdAt": "2024-05-01T10:00:00Z"
    });

    let from_nested = normalize(EventName::MessageNew, &nested, received_at()).expect("nested");
    let from_bare = normalize(EventName::MessageNew, &bare, received_at()).expect("bare");
    assert_eq!(from_nested, from_bare);

    let InboundEvent::MessageNew(message) = from_nested else {
        panic!("expected message:new");
    };
    assert_eq!(message.id, MessageId::from("m1"));
    assert_eq!(message.conversation_id, ConversationId::from("c1"));
    assert_eq!(message.sender_id, Some(UserId::from("u2")));
    assert_eq!(
        message.created_at,
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single().expect("ts")
    );
}

#[test]
fn message_without_id_is_malformed() {
    let payload = json!({ "conversationId": "c1", "content": "no id" });
    let err = normalize(EventName::MessageNew, &payload, received_at()).expect_err("malformed");
    assert_eq!(err.event, "message:new");
    assert!(err.reason.contains("message id"), "unexpected reason: {}", err.reason);
}

#[test]
fn message_without_conversation_is_malformed() {
    let payload = json!({ "message": { "id": "m9", "content": "orphan" } });
    let err = normalize(EventName::MessageNew, &payload, received_at()).expect_err("malformed");
    assert!(err.reason.contains("conversation"));
}

#[test]
fn missing_created_at_falls_back_to_receive_time() {
    let payload = json!({ "id": "m1", "conversationId": "c1", "content": "x" });
    let InboundEvent::MessageNew(message) =
        normalize(EventName::MessageNew, &payload, received_at()).expect("event")
    else {
        panic!("expected message:new");
    };
    assert_eq!(message.created_at, received_at());
}

#[test]
fn message_updated_reads_explicit_or_nested_id() {
    let explicit = json!({
        "messageId": "m2",
        "conversationId": "c1",
        "content": "edited",
        "editedAt": "2024-05-01T11:00:00Z"
    });
    let nested = json!({
        "message": {
            "_id": "m2",
            "conversationId": "c1",
            "content": "edited",
            "editedAt": "2024-05-01T11:00:00Z"
        }
    });

    let a = normalize(EventName::MessageUpdated, &explicit, received_at()).expect("explicit");
    let b = normalize(EventName::MessageUpdated, &nested, received_at()).expect("nested");
    assert_eq!(a, b);
    let InboundEvent::MessageUpdated(edit) = a else {
        panic!("expected message:updated");
    };
    assert_eq!(edit.message_id, MessageId::from("m2"));
    assert_eq!(edit.content, "edited");
}

#[test]
fn message_updated_without_content_is_malformed() {
    let payload = json!({ "messageId": "m2" });
    assert!(normalize(EventName::MessageUpdated, &payload, received_at()).is_err());
}

#[test]
fn message_deleted_defaults_timestamp() {
    let payload = json!({ "messageId": "m3", "conversationId": "c1" });
    let event = normalize(EventName::MessageDeleted, &payload, received_at()).expect("event");
    assert_eq!(
        event,
        InboundEvent::MessageDeleted(MessageRemoval {
            conversation_id: Some(ConversationId::from("c1")),
            message_id: MessageId::from("m3"),
            at: received_at(),
        })
    );
}

#[test]
fn typing_update_requires_user_list() {
    let ok = json!({ "conversationId": "c1", "typingUsers": ["u2", "u3"] });
    let event = normalize(EventName::TypingUpdate, &ok, received_at()).expect("typing");
    assert_eq!(
        event,
        InboundEvent::TypingUpdate(TypingUpdate {
            conversation_id: ConversationId::from("c1"),
            typing_users: vec![UserId::from("u2"), UserId::from("u3")],
        })
    );

    let missing = json!({ "conversationId": "c1" });
    assert!(normalize(EventName::TypingUpdate, &missing, received_at()).is_err());
}

#[test]
fn membership_merges_single_and_list_user_fields() {
    let payload = json!({
        "conversationId": "c1",
        "userId": "u4",
        "members": [{ "_id": "u5" }, "u4"],
        "memberCount": 6
    });
    let InboundEvent::MemberAdded(change) =
        normalize(EventName::MemberAdded, &payload, received_at()).expect("event")
    else {
        panic!("expected member added");
    };
    assert_eq!(change.user_ids, vec![UserId::from("u5"), UserId::from("u4")]);
    assert_eq!(change.member_count, Some(6));
}

#[test]
fn conversation_patch_counts_members_when_count_absent() {
    let payload = json!({
        "conversation": {
            "_id": "c7",
            "name": "planning",
            "participants": ["u1", { "userId": "u2", "name": "Bo" }]
        }
    });
    let InboundEvent::ConversationNew(patch) =
        normalize(EventName::ConversationNew, &payload, received_at()).expect("event")
    else {
        panic!("expected conversation:new");
    };
    assert_eq!(patch.id, ConversationId::from("c7"));
    assert_eq!(patch.name.as_deref(), Some("planning"));
    assert_eq!(patch.member_count, Some(2));
}

#[test]
fn reaction_accepts_nested_reaction_object() {
    let payload = json!({
        "messageId": "m1",
        "conversationId": "c1",
        "reaction": { "userId": "u2", "emoji": "+1" }
    });
    let event = normalize(EventName::ReactionAdded, &payload, received_at()).expect("event");
    assert_eq!(
        event,
        InboundEvent::ReactionAdded(ReactionChange {
            conversation_id: Some(ConversationId::from("c1")),
            message_id: MessageId::from("m1"),
            user_id: UserId::from("u2"),
            emoji: "+1".to_string(),
        })
    );
}

#[test]
fn user_status_maps_unknown_values() {
    let payload = json!({ "userId": "u2", "status": "busy" });
    let InboundEvent::UserStatus(change) =
        normalize(EventName::UserStatus, &payload, received_at()).expect("event")
    else {
        panic!("expected user:status");
    };
    assert_eq!(change.status, PresenceStatus::Unknown);
}

#[test]
fn lifecycle_payloads_accept_strings_or_objects() {
    assert_eq!(
        normalize(EventName::Disconnect, &json!("io server disconnect"), received_at())
            .expect("event"),
        InboundEvent::Disconnected {
            reason: "io server disconnect".to_string()
        }
    );
    assert_eq!(
        normalize(
            EventName::ConnectError,
            &json!({ "message": "xhr poll error" }),
            received_at()
        )
        .expect("event"),
        InboundEvent::ConnectError {
            message: "xhr poll error".to_string()
        }
    );
}

#[test]
fn outbound_payloads_use_camel_case_conversation_id() {
    let send = OutboundCommand::SendMessage {
        conversation_id: ConversationId::from("c1"),
        message: "hi".to_string(),
    };
    assert_eq!(send.event_name(), "message:send");
    assert_eq!(
        send.payload(),
        json!({ "conversationId": "c1", "message": "hi" })
    );

    let join = OutboundCommand::JoinRoom {
        conversation_id: ConversationId::from("c1"),
    };
    assert_eq!(join.event_name(), "conversation:join");
    assert_eq!(join.payload(), json!({ "conversationId": "c1" }));
}

#[test]
fn event_names_round_trip_through_parse() {
    for event in EventName::ALL {
        assert_eq!(EventName::parse(event.as_str()), Some(event));
    }
    assert_eq!(EventName::parse("message:exploded"), None);
}
