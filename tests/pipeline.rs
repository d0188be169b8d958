//! End-to-end turns over the in-memory store and a scripted model.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{pdf, pptx, ScriptedClient};
use jorge::context::{ContextBuilder, FILE_SEPARATOR};
use jorge::error::ChatError;
use jorge::extract::{self, MIME_PDF, MIME_PPTX};
use jorge::models::{NewFile, Role};
use jorge::prompt::{Intent, OutputMode, CONTEXT_LABEL, NO_FILES_SENTINEL};
use jorge::store::{ChatStore, InMemoryStore};
use jorge::transcript::{TranscriptAssembler, TurnOptions, HISTORY_WINDOW};
use tempfile::TempDir;

struct Harness {
    tmp: TempDir,
    store: Arc<InMemoryStore>,
    client: Arc<ScriptedClient>,
    context: Arc<ContextBuilder>,
    assembler: TranscriptAssembler,
    convo: String,
}

impl Harness {
    async fn new(client: ScriptedClient) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.create_user("alice", Some("Alice")).await.unwrap();
        let convo = store
            .create_conversation("alice", Some("Biology 101"))
            .await
            .unwrap()
            .id;
        let client = Arc::new(client);
        let context = Arc::new(ContextBuilder::new(store.clone()));
        let assembler = TranscriptAssembler::new(
            store.clone(),
            context.clone(),
            client.clone(),
            "qwen3:4b",
            12_000,
        );
        Self {
            tmp: TempDir::new().unwrap(),
            store,
            client,
            context,
            assembler,
            convo,
        }
    }

    async fn attach(&self, filename: &str, media_type: &str, bytes: &[u8]) {
        let path = self.tmp.path().join(filename);
        std::fs::write(&path, bytes).unwrap();
        self.store
            .insert_file(NewFile {
                conversation_id: self.convo.clone(),
                filename: filename.to_string(),
                media_type: media_type.to_string(),
                size_bytes: bytes.len() as i64,
                stored_path: path.to_string_lossy().into_owned(),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn no_files_yields_empty_context_and_sentinel_prompt() {
    let h = Harness::new(ScriptedClient::replying("ok")).await;

    assert_eq!(h.context.build(&h.convo, 12_000).await.unwrap(), "");

    let prompt = h
        .assembler
        .preview_prompt(&h.convo, Intent::Custom, OutputMode::Full)
        .await
        .unwrap();
    assert!(prompt.ends_with(&format!("{}\n{}", CONTEXT_LABEL, NO_FILES_SENTINEL)));
}

#[tokio::test]
async fn pdf_with_blank_middle_page_keeps_page_positions() {
    let bytes = pdf(&[Some("Mitochondria"), None, Some("Ribosomes")]);

    let text = extract::extract_text(&bytes, MIME_PDF).unwrap();
    let pages: Vec<&str> = text.split('\n').collect();
    assert_eq!(pages.len(), 3, "{:?}", text);
    assert!(pages[0].contains("Mitochondria"), "{:?}", text);
    assert_eq!(pages[1], "");
    assert!(pages[2].contains("Ribosomes"), "{:?}", text);

    let h = Harness::new(ScriptedClient::replying("ok")).await;
    h.attach("cells.pdf", MIME_PDF, &bytes).await;
    let context = h.context.build(&h.convo, 12_000).await.unwrap();
    assert!(context.starts_with("FILE: cells.pdf\n"));
    assert!(context.contains("Mitochondria"));
    assert!(context.contains("Ribosomes"));
}

#[tokio::test]
async fn blank_message_is_rejected_before_anything_is_written() {
    let h = Harness::new(ScriptedClient::replying("ok")).await;

    let err = h
        .assembler
        .send(&h.convo, "   ", &TurnOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert!(h.store.list_messages(&h.convo, 50, None).await.unwrap().is_empty());
    assert_eq!(h.client.call_count(), 0);
}

#[tokio::test]
async fn transcript_holds_window_plus_new_message() {
    let h = Harness::new(ScriptedClient::replying("ok")).await;
    for i in 0..25 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        h.store
            .insert_message(&h.convo, role, &format!("m{}", i))
            .await
            .unwrap();
    }

    let assembled = h
        .assembler
        .assemble(&h.convo, "newest", Intent::Summary, OutputMode::Quick)
        .await
        .unwrap();

    let t = &assembled.transcript;
    assert_eq!(t.len(), HISTORY_WINDOW as usize + 2);
    assert_eq!(t[0].role, Role::System);
    assert_eq!(t.iter().filter(|turn| turn.role == Role::System).count(), 1);

    let contents: Vec<&str> = t[1..].iter().map(|turn| turn.content.as_str()).collect();
    let mut expected: Vec<String> = (5..25).map(|i| format!("m{}", i)).collect();
    expected.push("newest".to_string());
    assert_eq!(contents, expected);
    assert_eq!(t.last().unwrap().role, Role::User);
}

#[tokio::test]
async fn failed_model_call_keeps_the_user_message() {
    let h = Harness::new(ScriptedClient::failing("connection refused")).await;

    let err = h
        .assembler
        .send(&h.convo, "What is ATP?", &TurnOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::UpstreamModel(_)));

    let stored = h.store.list_messages(&h.convo, 50, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[0].content, "What is ATP?");
}

#[tokio::test]
async fn full_turn_grounds_the_model_in_attached_files() {
    let h = Harness::new(ScriptedClient::replying("Cells are the unit of life.")).await;
    h.attach("intro.pptx", MIME_PPTX, &pptx(&[&["Cell theory"], &["Organelles", "Nucleus"]]))
        .await;
    h.attach("photo.png", "image/png", b"\x89PNG\r\n").await;
    h.attach("lab.pdf", MIME_PDF, &pdf(&[Some("Microscopy")])).await;

    let outcome = h
        .assembler
        .send(
            &h.convo,
            "Summarise the slides",
            &TurnOptions {
                intent: Intent::Summary,
                mode: OutputMode::StudyReady,
                model: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.assistant_message.content, "Cells are the unit of life.");

    let transcript = h.client.last_transcript();
    let system = &transcript[0].content;
    assert!(system.contains(
        "FILE: intro.pptx\nSLIDE 1:\nCell theory\n\nSLIDE 2:\nOrganelles\nNucleus"
    ));
    assert!(system.contains(&format!("{}FILE: lab.pdf\n", FILE_SEPARATOR)));
    assert!(!system.contains("photo.png"));
    for rule in OutputMode::StudyReady.rules() {
        assert!(system.contains(rule));
    }
    assert!(system.contains(Intent::Summary.rule()));

    let history = h.store.list_messages(&h.convo, 50, None).await.unwrap();
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn context_is_capped_at_the_character_budget() {
    let h = Harness::new(ScriptedClient::replying("ok")).await;
    let long = "x".repeat(400);
    h.attach("a.pptx", MIME_PPTX, &pptx(&[&[long.as_str()]])).await;
    h.attach("b.pptx", MIME_PPTX, &pptx(&[&[long.as_str()]])).await;

    let full = h.context.build(&h.convo, usize::MAX).await.unwrap();
    let capped = h.context.build(&h.convo, 500).await.unwrap();
    assert!(full.chars().count() > 500);
    assert_eq!(capped.chars().count(), 500);
    assert_eq!(capped, full.chars().take(500).collect::<String>());

    // Same input, same bytes.
    assert_eq!(full, h.context.build(&h.convo, usize::MAX).await.unwrap());
}

#[test]
fn extract_file_reads_from_disk() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("deck.pptx");
    std::fs::write(&path, pptx(&[&["Hello"]])).unwrap();
    assert_eq!(
        extract::extract_file(MIME_PPTX, Path::new(&path)).unwrap(),
        "SLIDE 1:\nHello"
    );
}
