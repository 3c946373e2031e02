//! Pure session state machine.
//!
//! `transition` decides what to say and where to go for one inbound message;
//! when the step needs the analysis service it returns a [`Call`] instead of
//! doing I/O. The dispatcher runs the call and feeds the result to `settle`.

use crate::{
    bot::texts,
    domain::PatientId,
    messaging::types::InboundMessage,
    session::SessionState,
};

pub const MAX_PATIENT_ID_LEN: usize = 64;

/// What the user sent, reduced to what the machine cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Trimmed message body (may be empty).
    Text(String),
    /// An attachment; the caption is the only text that travels with it.
    Media { caption: Option<String> },
}

impl Input {
    pub fn from_message(msg: &InboundMessage) -> Self {
        // For media, WhatsApp puts a thumbnail in `body`; the user's text is the caption.
        if msg.has_media() {
            let caption = msg
                .caption
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            return Input::Media { caption };
        }
        Input::Text(msg.trimmed_body().to_string())
    }

    fn text(&self) -> &str {
        match self {
            Input::Text(t) => t,
            Input::Media { .. } => "",
        }
    }
}

/// Side-effecting request the dispatcher must perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    UploadDocument { patient: PatientId },
    AskVision { question: String },
    AskPatient { patient: PatientId, question: String },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::UploadDocument { .. } => "upload_document",
            Call::AskVision { .. } => "ask_vision",
            Call::AskPatient { .. } => "ask_patient",
        }
    }
}

/// Result of running a [`Call`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Uploaded,
    Answer(String),
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    Stay,
    Goto(SessionState),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub replies: Vec<String>,
    pub next: Next,
    pub call: Option<Call>,
}

impl Transition {
    fn reply(replies: &[&str], next: Next) -> Self {
        Self {
            replies: replies.iter().map(|s| s.to_string()).collect(),
            next,
            call: None,
        }
    }

    fn call(replies: &[&str], call: Call) -> Self {
        Self {
            replies: replies.iter().map(|s| s.to_string()).collect(),
            next: Next::Stay,
            call: Some(call),
        }
    }

    fn nothing() -> Self {
        Self::reply(&[], Next::Stay)
    }
}

/// Validate a user-supplied patient id.
///
/// `.` and `..` are rejected: they cannot travel as a single URL path segment.
pub fn parse_patient_id(text: &str) -> Option<PatientId> {
    let id = text.trim();
    if id.is_empty() || id.chars().count() > MAX_PATIENT_ID_LEN || id == "." || id == ".." {
        return None;
    }
    Some(PatientId(id.to_string()))
}

/// One step for an inbound message. Exit commands are handled by the caller.
pub fn transition(state: &SessionState, input: &Input, default_question: &str) -> Transition {
    match state {
        SessionState::Initial => {
            Transition::reply(&[texts::MENU], Next::Goto(SessionState::MenuSelection))
        }

        SessionState::MenuSelection => match input.text() {
            "1" => Transition::reply(
                &[texts::UPLOAD_ASK_PATIENT_ID],
                Next::Goto(SessionState::UploadGetPatientId),
            ),
            "2" => Transition::reply(
                &[texts::CHAT_ASK_PATIENT_ID],
                Next::Goto(SessionState::ChatGetPatientId),
            ),
            _ => Transition::reply(&[texts::INVALID_OPTION, texts::MENU], Next::Stay),
        },

        SessionState::UploadGetPatientId => match parse_patient_id(input.text()) {
            Some(patient) => Transition {
                replies: vec![texts::upload_patient_id_set(patient.as_str())],
                next: Next::Goto(SessionState::UploadWaitFile { patient }),
                call: None,
            },
            None => Transition::reply(&[texts::INVALID_PATIENT_ID], Next::Stay),
        },

        SessionState::UploadWaitFile { patient } => match input {
            Input::Media { .. } => Transition::call(
                &[texts::UPLOADING],
                Call::UploadDocument {
                    patient: patient.clone(),
                },
            ),
            Input::Text(_) => Transition::reply(&[texts::ASK_FOR_FILE], Next::Stay),
        },

        SessionState::ChatGetPatientId => match parse_patient_id(input.text()) {
            Some(patient) => Transition::reply(
                &[texts::CHAT_INSTRUCTIONS],
                Next::Goto(SessionState::ChatMode { patient }),
            ),
            None => Transition::reply(&[texts::INVALID_PATIENT_ID], Next::Stay),
        },

        SessionState::ChatMode { patient } => match input {
            Input::Media { caption } => Transition::call(
                &[texts::ANALYZING_IMAGE],
                Call::AskVision {
                    question: caption
                        .clone()
                        .unwrap_or_else(|| default_question.to_string()),
                },
            ),
            Input::Text(text) if text.is_empty() => Transition::nothing(),
            Input::Text(text) => Transition::call(
                &[],
                Call::AskPatient {
                    patient: patient.clone(),
                    question: text.clone(),
                },
            ),
        },
    }
}

/// Follow-up step once a [`Call`] has completed.
pub fn settle(call: &Call, outcome: &CallOutcome) -> Transition {
    match (call, outcome) {
        (Call::UploadDocument { .. }, CallOutcome::Failed) => {
            Transition::reply(&[texts::UPLOAD_FAILED], Next::Stay)
        }
        (Call::UploadDocument { .. }, _) => Transition::reply(
            &[texts::UPLOAD_OK, texts::UPLOAD_NEXT_HINT, texts::MENU],
            Next::Goto(SessionState::MenuSelection),
        ),
        (Call::AskVision { .. }, CallOutcome::Answer(answer))
        | (Call::AskPatient { .. }, CallOutcome::Answer(answer)) => Transition {
            replies: vec![answer.clone()],
            next: Next::Stay,
            call: None,
        },
        (Call::AskVision { .. }, _) => Transition::reply(&[texts::VISION_FAILED], Next::Stay),
        (Call::AskPatient { .. }, _) => Transition::reply(&[texts::QA_FAILED], Next::Stay),
    }
}
