//! End-to-end reasoning flows against mock LLM and retrieval services.

mod support;

use std::time::Duration;

use deepmed_core::{ChatRequest, EventType, RequestPipeline, SessionStatus, StreamEvent};
use support::{
    collect_events, metformin_retrieval_response, spawn_retrieval, test_config, unreachable_addr,
    MockLlm, MockReply,
};

fn request(question: &str) -> ChatRequest {
    ChatRequest {
        question: question.to_string(),
        temperature: None,
        top_p: None,
        presence_penalty: None,
        max_tokens: None,
        session_id: None,
    }
}

fn count(events: &[StreamEvent], event_type: EventType) -> usize {
    events.iter().filter(|e| e.event_type == event_type).count()
}

fn position(events: &[StreamEvent], event_type: EventType) -> usize {
    events
        .iter()
        .position(|e| e.event_type == event_type)
        .unwrap_or_else(|| panic!("missing event {:?}", event_type))
}

fn terminal_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| e.event_type.is_terminal()).count()
}

const TOOL_CALL_REPLY: &str = "<think>I should search the knowledge base first.</think>\n<tool_call>\n{\"name\": \"knowledge_retrieval\", \"arguments\": {\"query\": \"first-line therapy for type 2 diabetes\", \"dataset_ids\": [\"ds-endo\"]}}\n</tool_call>";

#[tokio::test]
async fn happy_path_streams_cited_answer() {
    let llm = MockLlm::new(vec![
        MockReply::text(TOOL_CALL_REPLY),
        MockReply::text(
            "{\"can_answer\": true, \"confidence\": 0.92, \"reason\": \"the guidelines name the first-line therapy\"}",
        ),
        MockReply::text(
            "Metformin is the recommended first-line therapy for type 2 diabetes [1]. It lowers hepatic glucose production [2].",
        ),
    ]);
    let llm_addr = llm.spawn().await;
    let retrieval_addr = spawn_retrieval(metformin_retrieval_response()).await;

    let pipeline = RequestPipeline::new(test_config(llm_addr, Some(retrieval_addr), &[]));
    let mut handle = pipeline
        .submit(request("What is the recommended first-line therapy for type 2 diabetes?"))
        .await;
    let session_id = handle.session_id.clone();

    let events = tokio::time::timeout(Duration::from_secs(10), collect_events(&mut handle))
        .await
        .expect("stream should finish");

    // Shape: one terminal, exactly one completed, completed last.
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(count(&events, EventType::Completed), 1);
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);

    // Progression matches the state machine.
    assert_eq!(events[0].event_type, EventType::Init);
    let round_start = position(&events, EventType::RoundStart);
    assert_eq!(events[round_start].round, Some(1));
    assert!(count(&events, EventType::Thinking) >= 1);

    let tool_execution = position(&events, EventType::ToolExecution);
    assert_eq!(
        events[tool_execution].tool_name.as_deref(),
        Some("knowledge_retrieval")
    );
    let tool_result = position(&events, EventType::ToolResult);
    assert!(events[tool_result]
        .result
        .as_deref()
        .unwrap()
        .contains("Diabetes Guidelines"));

    let judgment_result = position(&events, EventType::JudgmentResult);
    assert!(events[judgment_result].judgment.as_ref().unwrap().can_answer);
    assert!(judgment_result > tool_result);

    let answer_generation = position(&events, EventType::AnswerGeneration);
    assert!(answer_generation > judgment_result);
    assert!(count(&events, EventType::FinalAnswerChunk) >= 1);

    // Citation list only on the terminal event, with both sources.
    let final_answer = position(&events, EventType::FinalAnswer);
    let answer_data = events[final_answer].answer_data.as_ref().expect("answer_data");
    assert_eq!(answer_data.citations.len(), 2);
    assert_eq!(answer_data.citations[0].id, 1);
    assert!(answer_data.answer.contains("[1]"));
    for chunk_event in events.iter().filter(|e| e.event_type == EventType::FinalAnswerChunk) {
        assert!(chunk_event.answer_data.is_none());
    }

    // Every event belongs to this session.
    assert!(events.iter().all(|e| e.session_id == session_id));

    // Citations resolvable from the store, with and without session scope.
    let stored = pipeline
        .citations()
        .lookup(Some(&session_id), 1)
        .expect("citation 1");
    assert!(stored.full_content.contains("first-line pharmacologic therapy"));
    assert!(pipeline.citations().lookup(None, 2).is_ok());
    assert!(pipeline.citations().lookup(Some(&session_id), 99).is_err());

    assert_eq!(pipeline.sessions().status(&session_id), Some(SessionStatus::Completed));
}

#[tokio::test]
async fn exhausting_rounds_without_confident_evidence_ends_in_no_answer() {
    let reject = "{\"can_answer\": false, \"confidence\": 0.1, \"reason\": \"the snippets are unrelated to the question\"}";
    let llm = MockLlm::new(vec![
        MockReply::text(TOOL_CALL_REPLY),
        MockReply::text(reject),
        MockReply::text(TOOL_CALL_REPLY),
        MockReply::text(reject),
    ]);
    let llm_addr = llm.spawn().await;
    let retrieval_addr = spawn_retrieval(metformin_retrieval_response()).await;

    let pipeline = RequestPipeline::new(test_config(
        llm_addr,
        Some(retrieval_addr),
        &[("MAX_ROUNDS", "2")],
    ));
    let mut handle = pipeline.submit(request("unanswerable question")).await;
    let session_id = handle.session_id.clone();

    let events = tokio::time::timeout(Duration::from_secs(10), collect_events(&mut handle))
        .await
        .expect("stream should finish");

    assert_eq!(count(&events, EventType::RoundStart), 2);
    assert_eq!(count(&events, EventType::ToolExecution), 2);
    assert_eq!(count(&events, EventType::ContinueReasoning), 1);
    assert_eq!(count(&events, EventType::FinalAnswer), 0);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(count(&events, EventType::NoAnswer), 1);
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);

    assert_eq!(pipeline.sessions().status(&session_id), Some(SessionStatus::Completed));
}

#[tokio::test]
async fn dead_backend_still_terminates_the_stream_cleanly() {
    let llm_addr = unreachable_addr().await;
    let pipeline = RequestPipeline::new(test_config(llm_addr, None, &[]));

    let mut handle = pipeline.submit(request("any question")).await;
    let session_id = handle.session_id.clone();

    let events = tokio::time::timeout(Duration::from_secs(10), collect_events(&mut handle))
        .await
        .expect("stream should finish");

    assert_eq!(events[0].event_type, EventType::Init);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(count(&events, EventType::Error), 1);
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);

    assert_eq!(pipeline.sessions().status(&session_id), Some(SessionStatus::Failed));

    // The admission slot was released despite the failure.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.stats().available_slots, 3);
}

#[tokio::test]
async fn expired_wall_clock_ends_in_timeout() {
    let llm = MockLlm::new(Vec::new());
    let llm_addr = llm.spawn().await;
    let pipeline = RequestPipeline::new(test_config(
        llm_addr,
        None,
        &[("REQUEST_WALL_CLOCK_SECONDS", "0")],
    ));

    let mut handle = pipeline.submit(request("slow question")).await;
    let session_id = handle.session_id.clone();

    let events = tokio::time::timeout(Duration::from_secs(5), collect_events(&mut handle))
        .await
        .expect("stream should finish");

    assert_eq!(terminal_count(&events), 1);
    assert_eq!(count(&events, EventType::Timeout), 1);
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);
    assert_eq!(pipeline.sessions().status(&session_id), Some(SessionStatus::TimedOut));
}

#[tokio::test]
async fn empty_rounds_exhaust_the_budget_into_no_answer() {
    // The mock returns empty completions once its script is exhausted.
    let llm = MockLlm::new(Vec::new());
    let llm_addr = llm.spawn().await;
    let pipeline = RequestPipeline::new(test_config(llm_addr, None, &[("MAX_ROUNDS", "3")]));

    let mut handle = pipeline.submit(request("question with a silent model")).await;
    let events = tokio::time::timeout(Duration::from_secs(10), collect_events(&mut handle))
        .await
        .expect("stream should finish");

    assert_eq!(count(&events, EventType::RoundStart), 3);
    assert_eq!(count(&events, EventType::RoundEnd), 3);
    assert_eq!(count(&events, EventType::NoAnswer), 1);
    assert_eq!(events.last().unwrap().event_type, EventType::Completed);
}
