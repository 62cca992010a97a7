use scriptflow_core::{ActType, RevisionDecision};

use crate::SynthesisOptions;

pub(crate) const ANALYSIS_CATEGORIES: [&str; 5] =
    ["timeline", "character", "plot", "dialogue", "scene"];

pub(crate) const MAX_FINDINGS: usize = 50;

pub(crate) const ANALYSIS_SYSTEM: &str = "You are a script consistency reviewer. \
Read the screenplay and report logical inconsistencies. Respond with a JSON object: \
{\"errors\": [{\"type\": \"timeline_error|character_inconsistency|plot_hole|dialogue_inconsistency|scene_continuity\", \
\"severity\": \"critical|high|medium|low\", \"description\": string, \
\"location\": {\"sceneNumber\": number?, \"line\": number?, \"characterName\": string?}, \
\"suggestion\": string?, \"confidence\": number}], \"summary\": string, \"confidence\": number}.";

pub(crate) fn analysis_user(script: &str) -> String {
    format!(
        "Check these categories: {}. Report at most {} issues, most severe first.\n\nSCRIPT:\n{}",
        ANALYSIS_CATEGORIES.join(", "),
        MAX_FINDINGS,
        script
    )
}

pub(crate) fn iteration_system(act: ActType) -> &'static str {
    match act {
        ActType::Act2Character => {
            "You are a character architect. Given a character and a contradiction in their \
behaviour, explain the contradiction in context and propose two or three ways to resolve it."
        }
        ActType::Act3Worldbuilding => {
            "You are a world-rules auditor. Given a setting, find places where the script breaks \
its own rules and propose fixes that keep the world consistent."
        }
        ActType::Act4Pacing => {
            "You are a pacing strategist. Given a time range of the story, find pacing problems \
and propose restructuring strategies that keep continuity intact."
        }
        ActType::Act5Theme => {
            "You are a thematic editor. Given a character and a theme, deepen the character so \
that the theme is expressed through their choices."
        }
    }
}

pub(crate) const ITERATION_FORMAT: &str = "Respond with a JSON object: \
{\"focusContext\": object, \"proposals\": [{\"id\": string, \"description\": string, \
\"pros\": [string], \"cons\": [string]}], \"recommendation\": string}.";

pub(crate) fn iteration_user(focus_name: &str, contradiction: &str, context: &str) -> String {
    format!(
        "FOCUS: {}\nPROBLEM: {}\n\nSCRIPT CONTEXT:\n{}",
        focus_name, contradiction, context
    )
}

pub(crate) const SYNTHESIS_SYSTEM: &str = "You are a script editor. Apply the accepted revision \
decisions to the original script and return the complete revised script. Respond with a JSON \
object: {\"synthesizedScript\": string, \"changeLog\": [{\"decisionId\": string, \"summary\": string}], \
\"conflicts\": [{\"description\": string, \"resolution\": string}], \"confidence\": number}.";

pub(crate) fn synthesis_user(
    original: &str,
    decisions: &[RevisionDecision],
    options: &SynthesisOptions,
) -> String {
    let decisions: Vec<String> = decisions
        .iter()
        .map(|d| {
            format!(
                "- [{}] {} ({}): {}",
                d.act,
                d.focus_name,
                d.id,
                d.user_choice
                    .clone()
                    .unwrap_or_else(|| d.proposals.to_string())
            )
        })
        .collect();
    format!(
        "OPTIONS: preserve original style: {}; conflict resolution: {:?}; integration: {:?}; \
include change log: {}; validate coherence: {}\n\nDECISIONS:\n{}\n\nORIGINAL SCRIPT:\n{}",
        options.preserve_original_style,
        options.conflict_resolution,
        options.change_integration_mode,
        options.include_change_log,
        options.validate_coherence,
        decisions.join("\n"),
        original
    )
}
