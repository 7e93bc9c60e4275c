//! Prompt construction for generative (chat-style) backends.

use weave_core::types::{OperationKind, RequestSpec};

/// System prompt for `spec`: the caller's rule text, or a built-in default.
pub fn system_prompt(spec: &RequestSpec) -> String {
    if let Some(rule) = spec.params.system_prompt.as_deref().filter(|r| !r.trim().is_empty()) {
        return rule.to_string();
    }

    match spec.operation {
        OperationKind::Translate => {
            let target = spec.params.target_lang.as_deref().unwrap_or("English");
            match spec.params.source_lang.as_deref() {
                Some(source) => format!(
                    "You are a professional translator. Translate the user's text from {} into {}. Output only the translation.",
                    source, target
                ),
                None => format!(
                    "You are a professional translator. Translate the user's text into {}. Output only the translation.",
                    target
                ),
            }
        }
        OperationKind::Expand => "Expand the user's short description into a detailed, vivid prompt for image generation. Output only the expanded prompt.".to_string(),
        OperationKind::CaptionImage => "Describe the image accurately and in detail, as a prompt that could recreate it. Output only the description.".to_string(),
        OperationKind::CaptionVideo => "The images are frames sampled from one video, in playback order. Describe the video's content and motion in detail. Output only the description.".to_string(),
    }
}

/// The user turn's text.
pub fn user_text(spec: &RequestSpec) -> String {
    if let Some(text) = spec.payload.text() {
        return text.to_string();
    }

    let frames = spec.payload.images().len();
    let mut text = match spec.operation {
        OperationKind::CaptionVideo => format!("Describe this video ({} frames).", frames),
        _ => "Describe this image.".to_string(),
    };
    if let Some(lang) = spec.params.target_lang.as_deref() {
        text.push_str(&format!(" Answer in {}.", lang));
    }
    text
}
