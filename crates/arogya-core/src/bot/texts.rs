//! User-facing bot strings (WhatsApp markdown).

pub const MENU: &str = "\n👋 *Welcome to Arogya AI Bot*\n\n\
Please select an option:\n\
1️⃣ *Upload Medical Record*\n\
2️⃣ *Chat with AI Assistant* (Ask questions or analyze images)\n\n\
Type *exit* to end session anytime.\n";

pub const GOODBYE: &str =
    "Chat session ended. Thank you for using Arogya AI. Send any message to start again.";

pub const INVALID_OPTION: &str = "Invalid option. Please type 1 or 2.";

pub const UPLOAD_ASK_PATIENT_ID: &str = "Please enter your Patient ID for file upload:";
pub const CHAT_ASK_PATIENT_ID: &str = "Please enter your Patient ID to access medical records:";
pub const INVALID_PATIENT_ID: &str =
    "That doesn't look like a valid Patient ID. Please enter it again (max 64 characters).";

pub const ASK_FOR_FILE: &str = "Please send a file or image.";
pub const UPLOADING: &str = "Uploading file...";
pub const UPLOAD_OK: &str = "✅ File uploaded successfully to your documents.";
pub const UPLOAD_NEXT_HINT: &str = "Type \"exit\" to quit or use the menu below.";
pub const UPLOAD_FAILED: &str =
    "❌ Failed to upload file. Please try again or check the Patient ID.";

pub const CHAT_INSTRUCTIONS: &str = "Chat mode active. You can:\n\
- Ask questions about your records\n\
- Upload images of tablets/scans for analysis\n\
- Type \"exit\" to quit";

pub const ANALYZING_IMAGE: &str = "Analyzing image...";
pub const VISION_FAILED: &str = "Unable to analyze image at the moment.";
pub const QA_FAILED: &str = "Sorry, I encountered an error accessing your records.";

pub fn upload_patient_id_set(patient: &str) -> String {
    format!("Patient ID set to \"{patient}\".\nPlease upload your medical record (PDF or Image).")
}
