//! Message lifecycle driven through a scripted transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chat_core::{MessageId, MessageRecord, MessageStatus};
use chat_request::testing::{ScriptedResponse, ScriptedTransport};
use chat_request::{RequestController, RequestDefaults, RequestOptions};
use chat_state::{
    ChatContext, ChatError, ChatOrchestrator, ChatProvider, Fallback, FallbackContext, MergeContext,
    MessageTransform, Placeholder,
};
use chat_stream::StreamEvent;
use serde_json::{json, Value};

const PLACEHOLDER: &str = "...";

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

struct TextTransform;

fn chunk_text(chunk: &StreamEvent) -> String {
    match chunk {
        StreamEvent::Json(value) => value["text"].as_str().unwrap_or_default().to_string(),
        other => other.text().unwrap_or_default().to_string(),
    }
}

impl MessageTransform<String, String> for TextTransform {
    fn local_message(&self, input: &String) -> String {
        input.clone()
    }

    fn merge(&self, context: MergeContext<'_, String>) -> String {
        match context.chunk {
            Some(chunk) => format!(
                "{}{}",
                context.origin.cloned().unwrap_or_default(),
                chunk_text(chunk)
            ),
            None if context.chunks.is_empty() => "(empty)".to_string(),
            None => context.chunks.iter().map(chunk_text).collect(),
        }
    }
}

fn provider(transport: &Arc<ScriptedTransport>) -> ChatProvider<String, String> {
    provider_with(transport, RequestOptions::new("http://scripted/chat"))
}

fn provider_with(
    transport: &Arc<ScriptedTransport>,
    options: RequestOptions,
) -> ChatProvider<String, String> {
    let options = options.manual(true).transport(transport.clone());
    let controller = RequestController::with_defaults(options, &RequestDefaults::default());
    ChatProvider::new(
        controller,
        |input: &String, history: &[MessageRecord<String>]| {
            json!({
                "prompt": input,
                "history": history.iter().map(|m| m.payload.clone()).collect::<Vec<_>>(),
            })
        },
        TextTransform,
    )
    .expect("manual controller")
}

fn orchestrator(transport: &Arc<ScriptedTransport>) -> ChatOrchestrator<String, String> {
    ChatOrchestrator::builder(Arc::new(ChatContext::new()))
        .provider(provider(transport))
        .placeholder(Placeholder::Value(PLACEHOLDER.to_string()))
        .build()
        .expect("orchestrator")
}

fn sent_body(transport: &ScriptedTransport, index: usize) -> Value {
    serde_json::from_slice(&transport.requests()[index].body).expect("json body")
}

fn summary(chat: &ChatOrchestrator<String, String>) -> Vec<(String, MessageStatus)> {
    chat.messages()
        .iter()
        .map(|m| (m.payload.clone(), m.status))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_request_streams_into_reply() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new().respond(
            ScriptedResponse::event_stream()
                .chunk(ms(10), "data: Hel\n\n")
                .chunk(ms(10), "data: lo\n\n"),
        ),
    );
    let chat = orchestrator(&transport);

    let handle = chat.request("hi".to_string())?;
    assert!(chat.is_requesting());
    assert_eq!(
        summary(&chat),
        vec![
            ("hi".to_string(), MessageStatus::Local),
            (PLACEHOLDER.to_string(), MessageStatus::Loading),
        ]
    );
    assert_eq!(chat.request_messages().len(), 1);

    handle.wait().await;

    assert!(!chat.is_requesting());
    assert_eq!(
        summary(&chat),
        vec![
            ("hi".to_string(), MessageStatus::Local),
            ("Hello".to_string(), MessageStatus::Success),
        ]
    );
    assert_eq!(sent_body(&transport, 0), json!({"prompt": "hi", "history": ["hi"]}));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_json_reply_goes_through_update() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new().respond(ScriptedResponse::json(json!({"text": "whole"}))),
    );
    let chat = orchestrator(&transport);

    chat.request("hi".to_string())?.wait().await;

    assert_eq!(
        summary(&chat).last(),
        Some(&("whole".to_string(), MessageStatus::Success))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_completion_without_chunks_replaces_placeholder() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new().respond(ScriptedResponse::event_stream()));
    let chat = orchestrator(&transport);

    chat.request("hi".to_string())?.wait().await;

    assert_eq!(
        summary(&chat),
        vec![
            ("hi".to_string(), MessageStatus::Local),
            ("(empty)".to_string(), MessageStatus::Success),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_single_flight() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond(ScriptedResponse::event_stream().chunk(ms(100), "data: one\n\n"))
            .respond(ScriptedResponse::event_stream().chunk(ms(0), "data: two\n\n")),
    );
    let chat = orchestrator(&transport);

    let first = chat.request("a".to_string())?;
    assert_eq!(
        chat.request("b".to_string()).unwrap_err(),
        ChatError::RequestInFlight
    );
    first.wait().await;

    chat.request("c".to_string())?.wait().await;
    assert_eq!(transport.request_count(), 2);
    assert_eq!(chat.messages().len(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reload_overwrites_target_in_place() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond(ScriptedResponse::event_stream().chunk(ms(0), "data: new answer\n\n")),
    );
    let target = MessageId::from("r1");
    let chat = ChatOrchestrator::builder(Arc::new(ChatContext::new()))
        .provider(provider(&transport))
        .placeholder(Placeholder::Value(PLACEHOLDER.to_string()))
        .default_messages(vec![
            MessageRecord::new("q1", "question".to_string(), MessageStatus::Local),
            MessageRecord::new(target.clone(), "old answer".to_string(), MessageStatus::Success),
        ])
        .build()?;

    let handle = chat.reload(&target, "question".to_string())?;
    assert_eq!(
        chat.store().get_message(&target).map(|m| m.status),
        Some(MessageStatus::Loading)
    );
    handle.wait().await;

    assert_eq!(
        summary(&chat),
        vec![
            ("question".to_string(), MessageStatus::Local),
            ("new answer".to_string(), MessageStatus::Success),
        ]
    );
    assert_eq!(chat.messages()[1].id, target);
    assert_eq!(
        sent_body(&transport, 0),
        json!({"prompt": "question", "history": ["question"]})
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reload_without_placeholder_marks_target_loading() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond(ScriptedResponse::event_stream().chunk(ms(20), "data: fresh\n\n")),
    );
    let target = MessageId::from("r1");
    let chat = ChatOrchestrator::builder(Arc::new(ChatContext::new()))
        .provider(provider(&transport))
        .default_messages(vec![
            MessageRecord::new("q1", "question".to_string(), MessageStatus::Local),
            MessageRecord::new(target.clone(), "stale".to_string(), MessageStatus::Error),
        ])
        .build()?;

    let handle = chat.reload(&target, "question".to_string())?;
    assert_eq!(
        chat.store().get_message(&target).map(|m| (m.payload, m.status)),
        Some(("stale".to_string(), MessageStatus::Loading))
    );
    handle.wait().await;

    assert_eq!(
        chat.store().get_message(&target).map(|m| (m.payload, m.status)),
        Some(("fresh".to_string(), MessageStatus::Success))
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_target_and_provider_fail_fast() {
    let transport = Arc::new(ScriptedTransport::new());
    let chat = orchestrator(&transport);
    assert_eq!(
        chat.reload(&MessageId::from("nope"), "x".to_string())
            .unwrap_err(),
        ChatError::MessageNotFound(MessageId::from("nope"))
    );
    assert!(!chat.is_requesting());

    let bare = ChatOrchestrator::<String, String>::builder(Arc::new(ChatContext::new()))
        .build()
        .expect("orchestrator");
    assert_eq!(bare.abort().unwrap_err(), ChatError::MissingProvider);
    assert_eq!(
        bare.request("x".to_string()).unwrap_err(),
        ChatError::MissingProvider
    );
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_marks_reply_aborted() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new().respond(
            ScriptedResponse::event_stream()
                .chunk(ms(0), "data: partial\n\n")
                .chunk(ms(5000), "data: never\n\n"),
        ),
    );
    let chat = orchestrator(&transport);

    let handle = chat.request("hi".to_string())?;
    tokio::time::sleep(ms(10)).await;
    chat.abort()?;
    handle.wait().await;

    assert!(!chat.is_requesting());
    assert_eq!(
        summary(&chat).last(),
        Some(&("partial".to_string(), MessageStatus::Abort))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fallback_replaces_placeholder() -> Result<()> {
    let transport = Arc::new(ScriptedTransport::new().fail("connection refused"));
    let chat = ChatOrchestrator::builder(Arc::new(ChatContext::new()))
        .provider(provider(&transport))
        .placeholder(Placeholder::Value(PLACEHOLDER.to_string()))
        .fallback(Fallback::generate(|context: FallbackContext<String, String>| {
            format!(
                "{} after {} messages ({})",
                context.error.name(),
                context.messages.len(),
                context.failed.map(|m| m.payload.as_str()).unwrap_or("none")
            )
        }))
        .build()?;

    chat.request("hi".to_string())?.wait().await;

    let messages = chat.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].payload, "HttpError after 1 messages (...)");
    assert_eq!(messages[1].status, MessageStatus::Error);
    assert!(!chat.is_requesting());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_error_without_fallback_keeps_content() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new().respond(
            ScriptedResponse::event_stream()
                .status(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
        ),
    );
    let chat = orchestrator(&transport);

    chat.request("hi".to_string())?.wait().await;

    assert_eq!(
        summary(&chat),
        vec![
            ("hi".to_string(), MessageStatus::Local),
            (PLACEHOLDER.to_string(), MessageStatus::Error),
        ]
    );
    assert!(chat
        .messages()
        .iter()
        .all(|m| !m.status.is_pending()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success_keeps_flag_and_settles_reply() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new()
            .fail("connection refused")
            .respond(ScriptedResponse::event_stream().chunk(ms(10), "data: reply\n\n")),
    );
    let chat = ChatOrchestrator::builder(Arc::new(ChatContext::new()))
        .provider(provider_with(
            &transport,
            RequestOptions::new("http://scripted/chat").retry(ms(100), Some(2)),
        ))
        .placeholder(Placeholder::Value(PLACEHOLDER.to_string()))
        .build()?;

    let handle = chat.request("hi".to_string())?;
    tokio::time::sleep(ms(50)).await;

    assert_eq!(transport.request_count(), 1);
    assert!(chat.is_requesting());
    assert_eq!(
        summary(&chat),
        vec![
            ("hi".to_string(), MessageStatus::Local),
            (PLACEHOLDER.to_string(), MessageStatus::Loading),
        ]
    );
    assert_eq!(
        chat.request("again".to_string()).unwrap_err(),
        ChatError::RequestInFlight
    );

    handle.wait().await;

    assert_eq!(transport.request_count(), 2);
    assert!(!chat.is_requesting());
    assert_eq!(
        summary(&chat),
        vec![
            ("hi".to_string(), MessageStatus::Local),
            ("reply".to_string(), MessageStatus::Success),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_request_during_retry_does_not_strand_reply() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new().fail("connection refused").respond(
            ScriptedResponse::event_stream()
                .chunk(ms(0), "data: part\n\n")
                .chunk(ms(5000), "data: rest\n\n"),
        ),
    );
    let chat = ChatOrchestrator::builder(Arc::new(ChatContext::new()))
        .provider(provider_with(
            &transport,
            RequestOptions::new("http://scripted/chat").retry(ms(100), Some(1)),
        ))
        .placeholder(Placeholder::Value(PLACEHOLDER.to_string()))
        .build()?;

    let handle = chat.request("a".to_string())?;
    tokio::time::sleep(ms(500)).await;

    assert_eq!(transport.request_count(), 2);
    assert_eq!(
        summary(&chat).last(),
        Some(&("part".to_string(), MessageStatus::Updating))
    );
    assert_eq!(
        chat.request("b".to_string()).unwrap_err(),
        ChatError::RequestInFlight
    );

    handle.wait().await;

    assert_eq!(transport.request_count(), 2);
    assert!(!chat.is_requesting());
    assert_eq!(
        summary(&chat),
        vec![
            ("a".to_string(), MessageStatus::Local),
            ("partrest".to_string(), MessageStatus::Success),
        ]
    );
    assert!(chat.messages().iter().all(|m| !m.status.is_pending()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_superseded_run_aborts_its_reply() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond(
                ScriptedResponse::event_stream()
                    .chunk(ms(0), "data: old\n\n")
                    .chunk(ms(5000), "data: never\n\n"),
            )
            .respond(ScriptedResponse::event_stream().chunk(ms(0), "data: new\n\n")),
    );
    let shared = provider(&transport);
    let context = Arc::new(ChatContext::new());
    let first = ChatOrchestrator::builder(context.clone())
        .conversation("c1")
        .provider(shared.clone())
        .placeholder(Placeholder::Value(PLACEHOLDER.to_string()))
        .build()?;
    let second = ChatOrchestrator::builder(context)
        .conversation("c2")
        .provider(shared)
        .build()?;

    let old = first.request("one".to_string())?;
    tokio::time::sleep(ms(10)).await;
    assert_eq!(
        summary(&first).last(),
        Some(&("old".to_string(), MessageStatus::Updating))
    );

    let new = second.request("two".to_string())?;
    old.wait().await;
    new.wait().await;

    assert!(!first.is_requesting());
    assert_eq!(
        summary(&first),
        vec![
            ("one".to_string(), MessageStatus::Local),
            ("old".to_string(), MessageStatus::Abort),
        ]
    );
    assert_eq!(
        summary(&second).last(),
        Some(&("new".to_string(), MessageStatus::Success))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_conversation_shares_store_and_flag() -> Result<()> {
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond(ScriptedResponse::event_stream().chunk(ms(50), "data: shared\n\n")),
    );
    let context = Arc::new(ChatContext::new());
    let first = ChatOrchestrator::builder(context.clone())
        .conversation("c1")
        .provider(provider(&transport))
        .build()?;
    let second = ChatOrchestrator::<String, String>::builder(context.clone())
        .conversation("c1")
        .provider(provider(&transport))
        .default_messages(vec![MessageRecord::new(
            "ignored",
            "not used".to_string(),
            MessageStatus::Local,
        )])
        .build()?;

    assert!(Arc::ptr_eq(first.store(), second.store()));
    assert!(second.messages().is_empty());

    let handle = first.request("hi".to_string())?;
    assert!(second.is_requesting());
    assert_eq!(
        second.request("again".to_string()).unwrap_err(),
        ChatError::RequestInFlight
    );
    handle.wait().await;

    assert!(!second.is_requesting());
    assert_eq!(
        summary(&second).last(),
        Some(&("shared".to_string(), MessageStatus::Success))
    );

    context.dispose();
    assert!(first.store().is_destroyed());
    Ok(())
}

#[tokio::test]
async fn test_loader_runs_once_per_conversation() -> Result<()> {
    let context = Arc::new(ChatContext::new());
    let history = vec![MessageRecord::new("h1", "from history".to_string(), MessageStatus::Success)];

    let first = ChatOrchestrator::<String, String>::builder(context.clone())
        .conversation("c1")
        .loader(async move { Ok::<_, String>(history) })
        .build()?;
    first.ready().await;
    assert_eq!(first.messages().len(), 1);

    let second = ChatOrchestrator::<String, String>::builder(context)
        .conversation("c1")
        .loader(async { Err::<Vec<MessageRecord<String>>, _>("never called") })
        .build()?;
    second.ready().await;
    assert_eq!(second.messages()[0].payload, "from history");
    Ok(())
}

#[tokio::test]
async fn test_panicking_loader_does_not_poison_ready() -> Result<()> {
    let chat = ChatOrchestrator::<String, String>::builder(Arc::new(ChatContext::new()))
        .default_messages(vec![MessageRecord::new("d1", "default".to_string(), MessageStatus::Local)])
        .loader(async {
            if true {
                panic!("history backend unavailable");
            }
            Ok::<Vec<MessageRecord<String>>, String>(Vec::new())
        })
        .build()?;

    chat.ready().await;
    chat.ready().await;

    assert_eq!(summary(&chat), vec![("default".to_string(), MessageStatus::Local)]);
    Ok(())
}

#[tokio::test]
async fn test_provider_requires_manual_controller() {
    let transport = Arc::new(
        ScriptedTransport::new().respond(ScriptedResponse::json(json!({"text": "auto"}))),
    );
    let controller = RequestController::with_defaults(
        RequestOptions::new("http://scripted/chat")
            .manual(false)
            .transport(transport.clone()),
        &RequestDefaults::default(),
    );

    let provider = ChatProvider::<String, String>::new(
        controller,
        |_: &String, _: &[MessageRecord<String>]| Value::Null,
        TextTransform,
    );
    assert!(matches!(provider, Err(ChatError::ProviderNotManual)));
}
