use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::{
    analysis::{AnalysisService, UploadFile},
    bot::{
        machine::{settle, transition, Call, CallOutcome, Input, Next, Transition},
        texts,
    },
    config::{Config, DEFAULT_VISION_QUESTION},
    domain::{ConversationId, PatientId},
    errors::Error,
    messaging::{port::MessagingPort, types::InboundMessage},
    session::{Session, SessionStore},
    utils::{is_exit_command, split_message, unix_millis, upload_file_name, vision_file_name},
    Result,
};

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub vision_default_question: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            vision_default_question: DEFAULT_VISION_QUESTION.to_string(),
        }
    }
}

impl From<&Config> for DispatcherConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            vision_default_question: cfg.vision_default_question.clone(),
        }
    }
}

/// Per-conversation async locks so steps for one sender never interleave.
#[derive(Default)]
pub struct ConversationLocks {
    inner: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub async fn lock(&self, id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop lock entries nobody is holding or waiting on.
    pub async fn prune(&self) {
        let mut map = self.inner.lock().await;
        map.retain(|_, l| Arc::strong_count(l) > 1);
    }
}

/// Bridges inbound transport messages to the session state machine.
pub struct Dispatcher {
    store: Arc<dyn SessionStore>,
    messenger: Arc<dyn MessagingPort>,
    analysis: Arc<dyn AnalysisService>,
    cfg: DispatcherConfig,
    locks: ConversationLocks,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SessionStore>,
        messenger: Arc<dyn MessagingPort>,
        analysis: Arc<dyn AnalysisService>,
        cfg: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            messenger,
            analysis,
            cfg,
            locks: ConversationLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    /// Handle one inbound message. Failures are logged, never returned.
    pub async fn dispatch(&self, msg: InboundMessage) {
        if msg.is_group {
            debug!(conversation = %msg.from, "ignoring group message");
            return;
        }

        let _guard = self.locks.lock(&msg.from).await;
        if let Err(e) = self.handle(&msg).await {
            let state = match self.store.get(&msg.from).await {
                Ok(Some(s)) => s.state.name(),
                Ok(None) => "NONE",
                Err(_) => "UNKNOWN",
            };
            error!(conversation = %msg.from, state, error = %e, "message handler failed");
        }
    }

    async fn handle(&self, msg: &InboundMessage) -> Result<()> {
        let from = &msg.from;

        if !msg.has_media() && is_exit_command(msg.trimmed_body()) {
            let existed = self.store.delete(from).await?;
            info!(conversation = %from, existed, "session ended by user");
            return self.send(from, texts::GOODBYE).await;
        }

        let mut session = match self.store.get(from).await? {
            Some(s) => s,
            None => {
                info!(conversation = %from, "new session");
                Session::new()
            }
        };

        let input = Input::from_message(msg);
        let step = transition(&session.state, &input, &self.cfg.vision_default_question);
        debug!(
            conversation = %from,
            state = session.state.name(),
            call = step.call.as_ref().map(Call::name),
            "transition"
        );

        let call = self.apply(from, &mut session, step).await?;

        if let Some(call) = call {
            let outcome = self.run_call(msg, &session, &call).await;
            let follow_up = settle(&call, &outcome);
            self.apply(from, &mut session, follow_up).await?;
        }

        session.touch();
        self.store.put(from, session).await
    }

    /// Send replies, move to the next state, and hand back any pending call.
    ///
    /// The state is updated before the replies go out so a failed send still
    /// leaves the conversation where the machine put it.
    async fn apply(
        &self,
        from: &ConversationId,
        session: &mut Session,
        step: Transition,
    ) -> Result<Option<Call>> {
        if let Next::Goto(next) = step.next {
            debug!(
                conversation = %from,
                from_state = session.state.name(),
                to_state = next.name(),
                "state change"
            );
            session.state = next;
        }

        for reply in &step.replies {
            if let Err(e) = self.send(from, reply).await {
                // Persist the new state even though the user missed a reply.
                session.touch();
                self.store.put(from, session.clone()).await?;
                return Err(e);
            }
        }
        Ok(step.call)
    }

    async fn send(&self, to: &ConversationId, text: &str) -> Result<()> {
        let max = self.messenger.capabilities().max_message_len;
        for chunk in split_message(text, max) {
            self.messenger.send_text(to, &chunk).await?;
        }
        Ok(())
    }

    async fn run_call(&self, msg: &InboundMessage, session: &Session, call: &Call) -> CallOutcome {
        let result = match call {
            Call::UploadDocument { patient } => self.run_upload(msg, patient).await,
            Call::AskVision { question } => self.run_vision(msg, question).await,
            Call::AskPatient { patient, question } => {
                self.analysis.ask_patient(patient, question).await.map(|a| {
                    debug!(
                        conversation = %msg.from,
                        patient = %patient,
                        citations = ?a.citations,
                        "patient question answered"
                    );
                    CallOutcome::Answer(a.answer)
                })
            }
        };

        result.unwrap_or_else(|e| {
            let patient = session.patient_id().map(|p| p.as_str()).unwrap_or("-");
            // 4xx: unknown patient or rejected file.
            if e.is_client_error() {
                warn!(conversation = %msg.from, state = session.state.name(), patient, call = call.name(), error = %e, "call rejected");
            } else {
                error!(conversation = %msg.from, state = session.state.name(), patient, call = call.name(), error = %e, "call failed");
            }
            CallOutcome::Failed
        })
    }

    async fn run_upload(&self, msg: &InboundMessage, patient: &PatientId) -> Result<CallOutcome> {
        let file = self
            .fetch_media(msg, |m| upload_file_name(m, unix_millis()))
            .await?;
        let name = file.file_name.clone();
        let receipt = self.analysis.upload_document(patient, file).await?;
        info!(
            conversation = %msg.from,
            patient = %patient,
            file = %name,
            document = receipt.id.as_deref().unwrap_or("-"),
            stored_as = receipt.filename.as_deref().unwrap_or("-"),
            url = receipt.download_url.as_deref().unwrap_or("-"),
            "document uploaded"
        );
        Ok(CallOutcome::Uploaded)
    }

    async fn run_vision(&self, msg: &InboundMessage, question: &str) -> Result<CallOutcome> {
        let file = self.fetch_media(msg, vision_file_name).await?;
        let answer = self.analysis.ask_vision(file, question).await?;
        Ok(CallOutcome::Answer(answer.answer))
    }

    async fn fetch_media(
        &self,
        msg: &InboundMessage,
        file_name: impl FnOnce(Option<&str>) -> String,
    ) -> Result<UploadFile> {
        let media = self.messenger.download_media(msg).await?;
        if media.bytes.is_empty() {
            return Err(Error::Transport("downloaded media is empty".to_string()));
        }
        let mimetype = media.mimetype.or_else(|| msg.mimetype.clone());
        Ok(UploadFile {
            file_name: file_name(mimetype.as_deref()),
            content_type: content_type(mimetype.as_deref()),
            bytes: media.bytes,
        })
    }
}

fn content_type(mimetype: Option<&str>) -> String {
    mimetype
        .filter(|m| m.contains('/'))
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{Answer, Citation, DocumentReceipt},
        domain::PatientId,
        messaging::types::{MediaPayload, MessageKind, MessagingCapabilities},
        session::{InMemorySessionStore, SessionState},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeMessenger {
        sends: StdMutex<Vec<(String, String)>>,
        fail_sends: AtomicBool,
        fail_downloads: AtomicBool,
        max_len: usize,
    }

    impl FakeMessenger {
        fn with_max_len(max_len: usize) -> Self {
            Self {
                max_len,
                ..Self::default()
            }
        }

        fn texts_to(&self, to: &str) -> Vec<String> {
            self.sends
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == to)
                .map(|(_, m)| m.clone())
                .collect()
        }

        fn clear(&self) {
            self.sends.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: if self.max_len == 0 { 4096 } else { self.max_len },
            }
        }

        async fn send_text(&self, to: &ConversationId, text: &str) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(Error::Transport("send failed".to_string()));
            }
            self.sends
                .lock()
                .unwrap()
                .push((to.0.clone(), text.to_string()));
            Ok(())
        }

        async fn download_media(&self, msg: &InboundMessage) -> Result<MediaPayload> {
            if self.fail_downloads.load(Ordering::SeqCst) {
                return Err(Error::Transport("download failed".to_string()));
            }
            Ok(MediaPayload {
                bytes: b"%PDF-1.4 fake".to_vec(),
                mimetype: msg.mimetype.clone(),
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Recorded {
        Upload {
            patient: String,
            file_name: String,
            content_type: String,
        },
        Vision {
            file_name: String,
            question: String,
        },
        Qa {
            patient: String,
            question: String,
        },
    }

    #[derive(Default)]
    struct FakeAnalysis {
        calls: StdMutex<Vec<Recorded>>,
        fail: AtomicBool,
        answer: StdMutex<String>,
    }

    impl FakeAnalysis {
        fn answering(answer: &str) -> Self {
            let a = Self::default();
            *a.answer.lock().unwrap() = answer.to_string();
            a
        }

        fn calls(&self) -> Vec<Recorded> {
            self.calls.lock().unwrap().clone()
        }

        fn check(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Backend {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AnalysisService for FakeAnalysis {
        async fn upload_document(
            &self,
            patient: &PatientId,
            file: UploadFile,
        ) -> Result<DocumentReceipt> {
            self.calls.lock().unwrap().push(Recorded::Upload {
                patient: patient.0.clone(),
                file_name: file.file_name,
                content_type: file.content_type,
            });
            self.check()?;
            Ok(DocumentReceipt {
                id: Some("doc_1".to_string()),
                filename: Some("stored.pdf".to_string()),
                download_url: Some("/files/stored.pdf".to_string()),
            })
        }

        async fn ask_vision(&self, file: UploadFile, question: &str) -> Result<Answer> {
            self.calls.lock().unwrap().push(Recorded::Vision {
                file_name: file.file_name,
                question: question.to_string(),
            });
            self.check()?;
            Ok(Answer {
                answer: self.answer.lock().unwrap().clone(),
                citations: vec![],
            })
        }

        async fn ask_patient(&self, patient: &PatientId, question: &str) -> Result<Answer> {
            self.calls.lock().unwrap().push(Recorded::Qa {
                patient: patient.0.clone(),
                question: question.to_string(),
            });
            self.check()?;
            Ok(Answer {
                answer: self.answer.lock().unwrap().clone(),
                citations: vec![Citation {
                    doc: "allergy.pdf".to_string(),
                    note: Some("page 2".to_string()),
                }],
            })
        }

        async fn health(&self) -> Result<()> {
            self.check()
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<InMemorySessionStore>,
        messenger: Arc<FakeMessenger>,
        analysis: Arc<FakeAnalysis>,
    }

    impl Harness {
        fn new(messenger: FakeMessenger, analysis: FakeAnalysis) -> Self {
            let store = Arc::new(InMemorySessionStore::default());
            let messenger = Arc::new(messenger);
            let analysis = Arc::new(analysis);
            let dispatcher = Dispatcher::new(
                store.clone(),
                messenger.clone(),
                analysis.clone(),
                DispatcherConfig::default(),
            );
            Self {
                dispatcher,
                store,
                messenger,
                analysis,
            }
        }

        async fn text(&self, from: &str, body: &str) {
            self.dispatcher
                .dispatch(InboundMessage::text(from, body))
                .await;
        }

        async fn state(&self, from: &str) -> Option<SessionState> {
            self.store
                .get(&ConversationId::new(from))
                .await
                .unwrap()
                .map(|s| s.state)
        }

        async fn seed(&self, from: &str, state: SessionState) {
            let mut s = Session::new();
            s.state = state;
            self.store.put(&ConversationId::new(from), s).await.unwrap();
        }
    }

    fn pdf(from: &str) -> InboundMessage {
        InboundMessage::media(from, "m-1", MessageKind::Document, "application/pdf", None)
    }

    fn pat(s: &str) -> PatientId {
        PatientId(s.to_string())
    }

    #[tokio::test]
    async fn upload_scenario_end_to_end() {
        let h = Harness::new(FakeMessenger::default(), FakeAnalysis::default());
        let a = "A@c.us";

        h.text(a, "hello").await;
        assert_eq!(h.messenger.texts_to(a), vec![texts::MENU.to_string()]);
        assert_eq!(h.state(a).await, Some(SessionState::MenuSelection));

        h.text(a, "1").await;
        assert_eq!(h.state(a).await, Some(SessionState::UploadGetPatientId));

        h.text(a, "PAT-12345").await;
        assert_eq!(
            h.state(a).await,
            Some(SessionState::UploadWaitFile {
                patient: pat("PAT-12345")
            })
        );

        h.messenger.clear();
        h.dispatcher.dispatch(pdf(a)).await;
        assert_eq!(h.state(a).await, Some(SessionState::MenuSelection));
        assert_eq!(
            h.messenger.texts_to(a),
            vec![
                texts::UPLOADING.to_string(),
                texts::UPLOAD_OK.to_string(),
                texts::UPLOAD_NEXT_HINT.to_string(),
                texts::MENU.to_string(),
            ]
        );

        let calls = h.analysis.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Recorded::Upload {
                patient,
                file_name,
                content_type,
            } => {
                assert_eq!(patient, "PAT-12345");
                assert!(file_name.starts_with("whatsapp_upload_"));
                assert!(file_name.ends_with(".pdf"));
                assert_eq!(content_type, "application/pdf");
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_upload_stays_waiting_for_file() {
        let analysis = FakeAnalysis::default();
        analysis.fail.store(true, Ordering::SeqCst);
        let h = Harness::new(FakeMessenger::default(), analysis);
        let a = "A@c.us";
        let waiting = SessionState::UploadWaitFile {
            patient: pat("PAT-1"),
        };
        h.seed(a, waiting.clone()).await;

        h.dispatcher.dispatch(pdf(a)).await;
        assert_eq!(h.state(a).await, Some(waiting.clone()));
        assert_eq!(
            h.messenger.texts_to(a),
            vec![texts::UPLOADING.to_string(), texts::UPLOAD_FAILED.to_string()]
        );

        // Retrying after the service recovers is not deduplicated: a second upload goes out.
        h.analysis.fail.store(false, Ordering::SeqCst);
        h.dispatcher.dispatch(pdf(a)).await;
        assert_eq!(h.state(a).await, Some(SessionState::MenuSelection));
        assert_eq!(h.analysis.calls().len(), 2);
    }

    #[tokio::test]
    async fn download_failure_does_not_reach_the_service() {
        let messenger = FakeMessenger::default();
        messenger.fail_downloads.store(true, Ordering::SeqCst);
        let h = Harness::new(messenger, FakeAnalysis::default());
        let a = "A@c.us";
        h.seed(
            a,
            SessionState::UploadWaitFile {
                patient: pat("PAT-1"),
            },
        )
        .await;

        h.dispatcher.dispatch(pdf(a)).await;
        assert!(h.analysis.calls().is_empty());
        assert_eq!(
            h.messenger.texts_to(a).last().map(String::as_str),
            Some(texts::UPLOAD_FAILED)
        );
        assert!(matches!(
            h.state(a).await,
            Some(SessionState::UploadWaitFile { .. })
        ));
    }

    // Citations are logged, never sent to the user.
    #[tokio::test]
    async fn chat_question_makes_one_qa_call_and_relays_answer() {
        let h = Harness::new(
            FakeMessenger::default(),
            FakeAnalysis::answering("You are allergic to penicillin."),
        );
        let b = "B@c.us";
        let chat = SessionState::ChatMode {
            patient: pat("PAT-99"),
        };
        h.seed(b, chat.clone()).await;

        h.text(b, "What are my allergies?").await;

        assert_eq!(
            h.analysis.calls(),
            vec![Recorded::Qa {
                patient: "PAT-99".to_string(),
                question: "What are my allergies?".to_string()
            }]
        );
        assert_eq!(
            h.messenger.texts_to(b),
            vec!["You are allergic to penicillin.".to_string()]
        );
        assert_eq!(h.state(b).await, Some(chat));
    }

    #[tokio::test]
    async fn chat_qa_failure_replies_with_fixed_error() {
        let analysis = FakeAnalysis::default();
        analysis.fail.store(true, Ordering::SeqCst);
        let h = Harness::new(FakeMessenger::default(), analysis);
        let b = "B@c.us";
        h.seed(
            b,
            SessionState::ChatMode {
                patient: pat("PAT-99"),
            },
        )
        .await;

        h.text(b, "anything").await;
        assert_eq!(h.messenger.texts_to(b), vec![texts::QA_FAILED.to_string()]);
        assert!(matches!(h.state(b).await, Some(SessionState::ChatMode { .. })));
    }

    #[tokio::test]
    async fn chat_image_without_caption_uses_default_question() {
        let h = Harness::new(FakeMessenger::default(), FakeAnalysis::answering("A paracetamol tablet."));
        let b = "B@c.us";
        h.seed(
            b,
            SessionState::ChatMode {
                patient: pat("PAT-99"),
            },
        )
        .await;

        let img = InboundMessage::media(b, "m-2", MessageKind::Image, "image/png", None);
        h.dispatcher.dispatch(img).await;

        assert_eq!(
            h.analysis.calls(),
            vec![Recorded::Vision {
                file_name: "vision_query.png".to_string(),
                question: DEFAULT_VISION_QUESTION.to_string()
            }]
        );
        assert_eq!(
            h.messenger.texts_to(b),
            vec![
                texts::ANALYZING_IMAGE.to_string(),
                "A paracetamol tablet.".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn exit_from_any_state_resets_conversation() {
        let h = Harness::new(FakeMessenger::default(), FakeAnalysis::default());
        let states = [
            SessionState::Initial,
            SessionState::MenuSelection,
            SessionState::UploadGetPatientId,
            SessionState::UploadWaitFile {
                patient: pat("P"),
            },
            SessionState::ChatGetPatientId,
            SessionState::ChatMode { patient: pat("P") },
        ];

        for (i, state) in states.into_iter().enumerate() {
            let from = format!("user{i}@c.us");
            h.seed(&from, state).await;
            let cmd = if i % 2 == 0 { "EXIT" } else { " Quit " };
            h.text(&from, cmd).await;

            assert_eq!(h.state(&from).await, None);
            assert_eq!(h.messenger.texts_to(&from), vec![texts::GOODBYE.to_string()]);

            h.text(&from, "hi again").await;
            assert_eq!(h.state(&from).await, Some(SessionState::MenuSelection));
        }
        assert!(h.analysis.calls().is_empty());
    }

    #[tokio::test]
    async fn exit_without_session_still_says_goodbye() {
        let h = Harness::new(FakeMessenger::default(), FakeAnalysis::default());
        h.text("new@c.us", "exit").await;
        assert_eq!(
            h.messenger.texts_to("new@c.us"),
            vec![texts::GOODBYE.to_string()]
        );
        assert!(h.store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn group_messages_are_ignored() {
        let h = Harness::new(FakeMessenger::default(), FakeAnalysis::default());
        let mut msg = InboundMessage::text("group@g.us", "hello");
        msg.is_group = true;
        h.dispatcher.dispatch(msg).await;

        assert!(h.store.is_empty().await.unwrap());
        assert!(h.messenger.texts_to("group@g.us").is_empty());
    }

    #[tokio::test]
    async fn send_failure_is_swallowed_and_state_still_advances() {
        let messenger = FakeMessenger::default();
        messenger.fail_sends.store(true, Ordering::SeqCst);
        let h = Harness::new(messenger, FakeAnalysis::default());

        h.text("a@c.us", "hello").await;
        assert_eq!(h.state("a@c.us").await, Some(SessionState::MenuSelection));

        h.messenger.fail_sends.store(false, Ordering::SeqCst);
        h.text("a@c.us", "2").await;
        assert_eq!(h.state("a@c.us").await, Some(SessionState::ChatGetPatientId));
    }

    #[tokio::test]
    async fn long_answers_are_split_across_messages() {
        let answer = "line one\nline two\nline three\n";
        let h = Harness::new(FakeMessenger::with_max_len(12), FakeAnalysis::answering(answer));
        h.seed(
            "b@c.us",
            SessionState::ChatMode {
                patient: pat("PAT-99"),
            },
        )
        .await;

        h.text("b@c.us", "summary?").await;
        let sent = h.messenger.texts_to("b@c.us");
        assert_eq!(sent.len(), 3);
        assert_eq!(sent.concat(), answer);
    }

    #[tokio::test]
    async fn messages_from_one_sender_are_processed_in_order() {
        let h = Arc::new(Harness::new(
            FakeMessenger::default(),
            FakeAnalysis::default(),
        ));
        h.seed("a@c.us", SessionState::MenuSelection).await;

        // Hold the conversation lock so both messages queue behind it.
        let guard = h.dispatcher.locks().lock(&ConversationId::new("a@c.us")).await;
        let first = {
            let h = h.clone();
            tokio::spawn(async move { h.text("a@c.us", "2").await })
        };
        tokio::task::yield_now().await;
        let second = {
            let h = h.clone();
            tokio::spawn(async move { h.text("a@c.us", "PAT-7").await })
        };
        tokio::task::yield_now().await;
        drop(guard);
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(
            h.state("a@c.us").await,
            Some(SessionState::ChatMode {
                patient: pat("PAT-7")
            })
        );
    }

    #[tokio::test]
    async fn prune_drops_idle_lock_entries() {
        let locks = ConversationLocks::default();
        {
            let _g = locks.lock(&ConversationId::new("a")).await;
            locks.prune().await;
            assert_eq!(locks.inner.lock().await.len(), 1);
        }
        locks.prune().await;
        assert!(locks.inner.lock().await.is_empty());
    }
}
