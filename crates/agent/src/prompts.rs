//! Texts sent to the optimizing agent.

use mathprompt_storage::BestPrompt;

/// Built-in system framing. `{model}` and `{train_count}` are substituted.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = "\
You are a prompt engineer optimising a system prompt for a small base language
model ({model}, no RLHF, no instruction tuning). This model cannot do
maths by default. Your job is to find a system prompt that makes it as accurate
as possible at solving math problems.

You have exactly ONE tool: evaluate_prompt(prompt)
- It tests your prompt against {train_count} randomly-generated math problems
- It returns ONLY the accuracy percentage
- Problems are freshly randomised each call, so you cannot overfit

Strategy:
- Start with a simple prompt to establish a baseline score
- Think carefully about why a base model fails at maths (formatting? computation? understanding the task?)
- Consider approaches: few-shot examples, chain-of-thought, step-by-step formatting, explicit instructions
- Each iteration, make deliberate changes and observe the effect on accuracy
- Keep track of what worked and what didn't
- Aim to maximise accuracy, even small improvements matter
";

/// Sent after the turn loop to get the handover text for the next session.
pub const SUMMARY_REQUEST: &str =
    "Summarise what you tried and learned in this session. Be concise, this will be passed to the next session as context.";

/// Fill the placeholders of a system template.
pub fn render_system(template: &str, model: &str, train_count: usize) -> String {
    template
        .replace("{model}", model)
        .replace("{train_count}", &train_count.to_string())
}

fn best_block(best: &BestPrompt) -> String {
    format!(
        "\n\nPrevious best result: {:.1}% accuracy with this prompt:\n---\n{}\n---\n",
        best.accuracy * 100.0,
        best.framing
    )
}

/// System framing for one session: the rendered template plus the best-known
/// prompt, if any.
pub fn system_prompt(rendered_template: &str, best: Option<&BestPrompt>) -> String {
    match best {
        Some(best) => format!("{}{}", rendered_template, best_block(best)),
        None => rendered_template.to_string(),
    }
}

/// Task text opening a session.
pub fn build_task(best: Option<&BestPrompt>, previous_summary: Option<&str>) -> String {
    let mut task = String::from(
        "Optimise the system prompt for the math model. \
         Use evaluate_prompt() to test prompts and iterate. \
         Try at least 8-10 different prompt variations. \
         Focus on maximising accuracy.",
    );

    if let Some(best) = best {
        task.push_str(&best_block(best));
        task.push_str("Try to beat this score. You can start from this prompt or try something completely different.");
    }

    if let Some(summary) = previous_summary.filter(|s| !s.trim().is_empty()) {
        task.push_str(&format!(
            "\n\nSummary from the previous session (what was tried and learned):\n---\n{}\n---\n",
            summary
        ));
    }

    task
}
