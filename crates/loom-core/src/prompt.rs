//! System Prompt Builder (spec §4.8, component H): deterministic assembly
//! of the head system message from the agent's current context.

use crate::tool::ToolDefinition;
use std::path::Path;
use std::process::Command;

/// Everything the builder needs; byte-identical inputs produce a
/// byte-identical prompt (spec §8 property 8).
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub assistant_name: String,
    pub model_label: String,
    pub date: String,
    pub tools: Vec<ToolDefinition>,
    pub git_branch: Option<String>,
    pub project_context: Option<String>,
    pub memories: Vec<String>,
    pub user_rules: Vec<String>,
    pub project_rules: Vec<String>,
    pub personality: Option<String>,
}

/// Discover the current git branch from `workspace`, if it is a git
/// worktree. Absence (no repo, no `git` binary) is silently `None`.
pub fn discover_git_branch(workspace: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workspace)
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch)
    }
}

/// Assemble the system prompt. Sections appear in a fixed order so that
/// identical `PromptContext` values always produce identical output.
pub fn build(ctx: &PromptContext) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "You are {}, an interactive coding agent operating on {} ({}).\n",
        ctx.assistant_name, ctx.date, ctx.model_label
    ));

    if !ctx.tools.is_empty() {
        out.push_str("\nAvailable tools:\n");
        let mut tools = ctx.tools.clone();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        for tool in &tools {
            let gate = if tool.safe { "safe" } else { "requires approval" };
            out.push_str(&format!("- {}: {} ({})\n", tool.name, tool.description, gate));
        }
    }

    if let Some(branch) = &ctx.git_branch {
        out.push_str(&format!("\nGit branch: {branch}\n"));
    }

    if let Some(project) = &ctx.project_context {
        out.push_str(&format!("\nProject context:\n{project}\n"));
    }

    if !ctx.memories.is_empty() {
        out.push_str("\nMemories:\n");
        for m in &ctx.memories {
            out.push_str(&format!("- {m}\n"));
        }
    }

    if !ctx.user_rules.is_empty() {
        out.push_str("\nUser rules:\n");
        for r in &ctx.user_rules {
            out.push_str(&format!("- {r}\n"));
        }
    }

    if !ctx.project_rules.is_empty() {
        out.push_str("\nProject rules:\n");
        for r in &ctx.project_rules {
            out.push_str(&format!("- {r}\n"));
        }
    }

    if let Some(personality) = &ctx.personality {
        out.push_str(&format!("\n{personality}\n"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> PromptContext {
        PromptContext {
            assistant_name: "loom".into(),
            model_label: "gpt-4o".into(),
            date: "2026-07-27".into(),
            tools: vec![
                ToolDefinition {
                    name: "read_file".into(),
                    description: "reads a file".into(),
                    parameters: serde_json::json!({}),
                    safe: true,
                },
                ToolDefinition {
                    name: "run_shell".into(),
                    description: "runs a shell command".into(),
                    parameters: serde_json::json!({}),
                    safe: false,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn identical_inputs_produce_identical_output() {
        let ctx = base_ctx();
        assert_eq!(build(&ctx), build(&ctx));
    }

    #[test]
    fn tools_listed_sorted_with_approval_gate() {
        let ctx = base_ctx();
        let out = build(&ctx);
        let read_pos = out.find("read_file").unwrap();
        let shell_pos = out.find("run_shell").unwrap();
        assert!(read_pos < shell_pos);
        assert!(out.contains("read_file: reads a file (safe)"));
        assert!(out.contains("run_shell: runs a shell command (requires approval)"));
    }

    #[test]
    fn personality_is_the_final_section() {
        let mut ctx = base_ctx();
        ctx.personality = Some("Be terse.".into());
        ctx.memories = vec!["likes dark mode".into()];
        let out = build(&ctx);
        assert!(out.trim_end().ends_with("Be terse."));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let ctx = PromptContext {
            assistant_name: "loom".into(),
            model_label: "gpt-4o".into(),
            date: "2026-07-27".into(),
            ..Default::default()
        };
        let out = build(&ctx);
        assert!(!out.contains("Git branch"));
        assert!(!out.contains("Memories"));
    }
}
