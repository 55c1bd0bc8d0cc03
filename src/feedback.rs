//! Builds escalating, loop-aware feedback text keyed on attempt count and
//! detected loop kind. Pure string-building, tested against every
//! precedence branch.

use crate::evaluator::{ReflectionAnalysis, Severity};

const PLANNING_LOOP_MESSAGE: &str = "STOP: Planning Loop Detected\n\n\
You have made many read-only tool calls with little or no write activity. \
Do not run another read, grep, glob, or research tool. Your very next action \
must be a write operation: edit a file, write a file, or apply a patch. If \
you believe no code changes are needed, state that explicitly and explain \
why the task is already complete.";

/// Render the composed feedback text.
pub fn compose(
    attempt: usize,
    max_attempts: usize,
    analysis: &ReflectionAnalysis,
    planning_loop: bool,
    action_loop: bool,
) -> String {
    if planning_loop {
        return PLANNING_LOOP_MESSAGE.to_string();
    }
    if action_loop {
        return format!(
            "STOP: Action Loop Detected\n\n\
             Attempt {attempt}/{max_attempts}. You have repeated the same command \
             several times without making progress. Do not re-run the same command \
             again. Choose one of:\n\
             1. Fix the root cause of the failure instead of retrying the same command.\n\
             2. Ask the user for help if you are blocked.\n\
             3. Try a fundamentally different approach.",
        );
    }

    if attempt <= 2 {
        let mut out = format!("**{}**: Incomplete\n\n{}\n", analysis.severity.as_str(), analysis.reason);
        if !analysis.missing.is_empty() {
            out.push_str("\n### Missing\n");
            for item in &analysis.missing {
                out.push_str(&format!("- {item}\n"));
            }
        }
        if !analysis.next_actions.is_empty() {
            out.push_str("\n### Next Actions\n");
            for item in &analysis.next_actions {
                out.push_str(&format!("- {item}\n"));
            }
        }
        out
    } else {
        let still_missing: Vec<&String> = analysis
            .missing
            .iter()
            .chain(analysis.next_actions.iter())
            .take(3)
            .collect();
        let mut out = format!("**Final Attempt** {attempt}/{max_attempts}\n\n");
        if !still_missing.is_empty() {
            let items: Vec<String> = still_missing.iter().map(|s| s.to_string()).collect();
            out.push_str(&format!("Still missing: {}\n\n", items.join("; ")));
        }
        out.push_str(
            "This is your final automatic reflection attempt. Either complete the \
             remaining work now, or clearly state what is blocking you and populate \
             `needs_user_action` with the specific steps a human must take.",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(missing: Vec<&str>, next_actions: Vec<&str>) -> ReflectionAnalysis {
        ReflectionAnalysis {
            complete: false,
            should_continue: true,
            reason: "Missing required workflow steps.".to_string(),
            missing: missing.into_iter().map(String::from).collect(),
            next_actions: next_actions.into_iter().map(String::from).collect(),
            requires_human_action: false,
            severity: Severity::High,
        }
    }

    #[test]
    fn planning_loop_precedence_dominates_action_loop() {
        let a = analysis(vec!["Run tests"], vec![]);
        let text = compose(1, 3, &a, true, true);
        assert!(text.starts_with("STOP: Planning Loop Detected"));
    }

    #[test]
    fn action_loop_includes_attempt_counter_and_escape_paths() {
        let a = analysis(vec![], vec![]);
        let text = compose(2, 3, &a, false, true);
        assert!(text.starts_with("STOP: Action Loop Detected"));
        assert!(text.contains("2/3"));
        assert!(text.contains("root cause"));
        assert!(text.contains("different approach"));
    }

    #[test]
    fn early_attempt_has_missing_and_next_actions_sections() {
        let a = analysis(vec!["Run tests"], vec!["Create PR"]);
        let text = compose(1, 3, &a, false, false);
        assert!(text.contains("### Missing"));
        assert!(text.contains("Run tests"));
        assert!(text.contains("### Next Actions"));
        assert!(text.contains("Create PR"));
    }

    #[test]
    fn sections_absent_when_empty() {
        let a = analysis(vec![], vec![]);
        let text = compose(1, 3, &a, false, false);
        assert!(!text.contains("### Missing"));
        assert!(!text.contains("### Next Actions"));
    }

    #[test]
    fn final_attempt_message_caps_at_three_items() {
        let a = analysis(vec!["a", "b", "c", "d"], vec![]);
        let text = compose(3, 3, &a, false, false);
        assert!(text.starts_with("**Final Attempt** 3/3"));
        assert!(text.contains("a; b; c"));
        assert!(!text.contains("d"));
    }
}
