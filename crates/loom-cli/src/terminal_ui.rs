//! Terminal implementation of `UiBridge`: prints to stdout, prompts on
//! stdin for approvals and choices, and opens files by just naming them
//! (no real IDE integration in this front-end).

use async_trait::async_trait;
use loom_core::approval::SharedApprovalGateway;
use loom_core::ui::UiBridge;
use std::io::Write;
use std::sync::Mutex;

/// Holds the approval gateway directly (rather than going through the
/// agent) so a synchronous stdin prompt can resolve its own request without
/// a round trip through a second front-end call.
pub struct TerminalUi {
    stdout: Mutex<()>,
    approvals: SharedApprovalGateway,
}

impl TerminalUi {
    pub fn new(approvals: SharedApprovalGateway) -> Self {
        Self {
            stdout: Mutex::new(()),
            approvals,
        }
    }

    pub fn print_error(&self, message: &str) {
        let _guard = self.stdout.lock().unwrap();
        eprintln!("error: {message}");
    }

    fn read_line(&self, prompt: &str) -> String {
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        line.trim().to_string()
    }
}

#[async_trait]
impl UiBridge for TerminalUi {
    async fn send_chat(&self, role: &str, text: &str) {
        let _guard = self.stdout.lock().unwrap();
        println!("[{role}] {text}");
    }

    async fn emit_assistant(&self, partial_text: &str) {
        let _guard = self.stdout.lock().unwrap();
        print!("{partial_text}");
        let _ = std::io::stdout().flush();
    }

    async fn emit_reasoning(&self, text: &str, done: bool) {
        let _guard = self.stdout.lock().unwrap();
        if done {
            println!();
        } else {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
    }

    async fn emit_billing(
        &self,
        provider: &str,
        model: &str,
        in_tokens: u64,
        out_tokens: u64,
        in_usd: f64,
        out_usd: f64,
        total_usd: f64,
    ) {
        let _guard = self.stdout.lock().unwrap();
        println!(
            "[usage] {provider}/{model} in={in_tokens} out={out_tokens} cost=${in_usd:.4}+${out_usd:.4}=${total_usd:.4}"
        );
    }

    async fn prompt_approval(&self, action_id: &str, summary: &str, diff: Option<&str>) {
        if let Some(diff) = diff {
            println!("--- diff ---\n{diff}\n------------");
        }
        let answer = self.read_line(&format!("Approve '{summary}' [{action_id}]? (y/n) "));
        self.approvals.resolve_approval(action_id, answer.eq_ignore_ascii_case("y"));
    }

    async fn prompt_choice(&self, action_id: &str, question: &str, options: &[String]) {
        println!("{question} [{action_id}]");
        for (i, opt) in options.iter().enumerate() {
            println!("  {i}) {opt}");
        }
        let answer = self.read_line("choice> ");
        if let Ok(index) = answer.parse::<usize>() {
            self.approvals.resolve_choice(action_id, index);
        }
    }

    async fn set_busy(&self, busy: bool) {
        if busy {
            print!("… ");
            let _ = std::io::stdout().flush();
        }
    }

    async fn open_file_in_ui(&self, path: &str) {
        let _guard = self.stdout.lock().unwrap();
        println!("(opened {path})");
    }
}
