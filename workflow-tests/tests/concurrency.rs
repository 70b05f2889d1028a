//! Many sessions at once: every stream completes, tokens stay in order, and
//! no stream sees another session's tokens.

use std::sync::Arc;

use workflow_tests::ChatPipeline;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_hundred_concurrent_sessions() {
    let pipeline = Arc::new(ChatPipeline::start().await);

    let mut handles = Vec::new();
    for i in 0..100 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let user_id = format!("user-{}", i);
            let session_id = pipeline.start_session(&user_id).await;
            let message = format!("hello from session {}", i);
            pipeline
                .submit_chat(&session_id, "m1", &user_id, &message)
                .await;

            let events = pipeline.collect_stream(&session_id, "m1").await;
            (i, events)
        }));
    }

    for handle in handles {
        let (i, events) = handle.await.expect("session task panicked");

        // Every stream terminates with the sentinel.
        assert_eq!(
            events.last().map(String::as_str),
            Some("__END__"),
            "session {} did not finish: {:?}",
            i,
            events
        );

        // The echo provider reflects this session's message; seeing any other
        // session's text would mean tokens crossed streams. The cache
        // replay fast-path may compact the tokens into one event, so assert
        // on the concatenation.
        let assistant = ChatPipeline::assistant_text(&events);
        assert_eq!(assistant, format!("Echo: hello from session {}", i));
    }
}
