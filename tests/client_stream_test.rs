use axum::{body::Body, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use bytes::Bytes;
use glycostream::client::{drive, replay};
use glycostream::transcript::{Artifact, Transcript};
use glycostream::*;
use std::io::Write;

async fn chat_handler(Json(payload): Json<serde_json::Value>) -> impl IntoResponse {
    let question = payload["messages"][0]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    // Chunk boundaries deliberately cut through a JSON line and a marker tag.
    let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from("data: {\"type\":\"tool_start\",\"name\":\"sparql\"}\ndata: {\"type\":\"te")),
        Ok(Bytes::from(format!(
            "xt_delta\",\"content\":\"<think>asked: {}</th\"}}\n",
            question
        ))),
        Ok(Bytes::from(
            "data: {\"type\":\"text_delta\",\"content\":\"ink>3 glycans match\"}\n",
        )),
        Ok(Bytes::from(
            "data: {\"type\":\"tool_end\",\"name\":\"sparql\"}\ndata: {\"type\":\"load_pdb\",\"url\":\"/files/a.pdb\",\"filename\":\"a.pdb\"}\n",
        )),
        Ok(Bytes::from("data: [DONE]\n")),
    ];

    (
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(futures_util::stream::iter(chunks)),
    )
}

async fn failing_handler() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "backend warming up")
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/broken", post(failing_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn ask_streams_and_demuxes_reply() {
    let base = spawn_backend().await;
    let client = ChatClient::new(
        reqwest::Client::new(),
        format!("{}/api/chat", base),
        DemuxConfig::default(),
    );

    let stream = client
        .ask(&[ChatMessage::user("Man5 binders")])
        .await
        .unwrap();
    let mut transcript = Transcript::new(reqwest::Url::parse(&format!("{}/", base)).ok());
    let mut outputs = 0;
    drive(stream, &mut transcript, |_| outputs += 1).await.unwrap();

    assert!(outputs >= 1);
    assert_eq!(transcript.visible_text, "3 glycans match");
    assert_eq!(transcript.reasoning_text, "asked: Man5 binders");
    assert_eq!(transcript.completed_tools, vec!["sparql".to_string()]);
    assert!(transcript.is_complete());
    assert_eq!(
        transcript.artifacts,
        vec![Artifact::Structure {
            url: format!("{}/files/a.pdb", base),
            filename: "a.pdb".to_string(),
        }]
    );
}

#[tokio::test]
async fn non_success_status_is_upstream_error() {
    let base = spawn_backend().await;
    let client = ChatClient::new(
        reqwest::Client::new(),
        format!("{}/api/broken", base),
        DemuxConfig::default(),
    );

    match client.ask(&[ChatMessage::user("hi")]).await {
        Err(e) => match e.inner {
            GlycoError::Upstream(status, body) => {
                assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "backend warming up");
            }
            other => panic!("unexpected error: {}", other),
        },
        Ok(_) => panic!("expected an upstream error"),
    }
}

#[tokio::test]
async fn replay_reads_captured_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "data: {{\"type\":\"code_output\",\"stdout\":\"SASA 1234.5\",\"stderr\":\"\",\"code\":\"print(sasa)\"}}\n\
         data: {{\"type\":\"error\",\"message\":\"timeout in fit\"}}\n\
         data: {{\"type\":\"text_delta\",\"content\":\"partial answer\"}}"
    )
    .unwrap();

    let reader = tokio::fs::File::open(file.path()).await.unwrap();
    let mut transcript = Transcript::new(None);
    drive(replay(reader, DemuxConfig::default()), &mut transcript, |_| {})
        .await
        .unwrap();

    assert_eq!(transcript.code_runs.len(), 1);
    assert_eq!(transcript.code_runs[0].stdout, "SASA 1234.5");
    assert_eq!(transcript.errors, vec!["timeout in fit".to_string()]);
    assert_eq!(transcript.visible_text, "partial answer");
    assert!(!transcript.done);
}
