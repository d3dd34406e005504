//! Prompt construction for the generator
//!
//! Each expansion mode has its own system instruction. The user's global
//! instruction is appended to every request.

use crate::models::ExpandMode;

/// Used when the user has not set an instruction of their own
pub const DEFAULT_LANGUAGE_RULE: &str = "Output should be in the same language as the input.";

/// Number of ideas asked for per expansion
pub const IDEAS_PER_EXPANSION: usize = 3;

/// Returns the base instruction describing how a mode should think
pub fn mode_instruction(mode: ExpandMode) -> String {
    match mode {
        ExpandMode::Why => format!(
            "You are a logical analyst specializing in '5 Whys' root cause analysis. \
             Your task is to identify deep, underlying causes and reasons. \
             STRICT RULE: Focus only on 'why' the issue exists. \
             DO NOT provide solutions, actions, or countermeasures. \
             Provide {} brief, distinct, and logical causes or reasons for it. \
             Keep each point under 10 words.",
            IDEAS_PER_EXPANSION
        ),
        ExpandMode::What => format!(
            "You are a strategic consultant specializing in decomposition and structural thinking. \
             Given an idea or task and its broader context, provide {} brief, distinct components, \
             sub-tasks, or 'What/How' elements that make it up. \
             Keep each point under 10 words.",
            IDEAS_PER_EXPANSION
        ),
    }
}

/// System instruction for an expansion, with the user's preferences attached
pub fn expand_system_instruction(mode: ExpandMode, user_instruction: &str) -> String {
    let preferences = if user_instruction.trim().is_empty() {
        DEFAULT_LANGUAGE_RULE
    } else {
        user_instruction
    };
    format!(
        "{}\n\nAdditional User Preferences:\n{}",
        mode_instruction(mode),
        preferences
    )
}

/// The user prompt for an expansion
pub fn expand_prompt(text: &str, context: &[String]) -> String {
    let mut prompt = String::new();
    if !context.is_empty() {
        prompt.push_str(&format!("Context path: {}\n\n", context.join(" -> ")));
    }
    prompt.push_str(&format!(
        "Expand on this specific idea: \"{}\". Provide {} distinct points.",
        text, IDEAS_PER_EXPANSION
    ));
    prompt
}

/// System instruction for a refinement
pub fn refine_system_instruction(user_instruction: &str) -> String {
    let extra = if user_instruction.trim().is_empty() {
        "Output in the same language as input.".to_string()
    } else {
        format!("Additional Instruction: {}", user_instruction)
    };
    format!(
        "You are an expert editor. Rewrite the given short phrase to be more natural, \
         grammatically correct, and professional while strictly preserving its original meaning.\n\
         Keep it concise (ideally under 15 words).\n\
         {}\n\
         Return ONLY the refined text string.",
        extra
    )
}

/// The user prompt for a refinement
pub fn refine_prompt(text: &str) -> String {
    format!("Refine this phrase: \"{}\"", text)
}

/// The complete exchange as recorded in the prompt log
pub fn full_prompt(system_instruction: &str, prompt: &str) -> String {
    format!(
        "[System Instruction]\n{}\n\n[Prompt]\n{}",
        system_instruction, prompt
    )
}
