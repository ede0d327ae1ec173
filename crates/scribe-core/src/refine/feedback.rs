//! Deterministic feedback derived from quality scores.

use super::validation::QualityScores;

/// Metrics below this get a targeted feedback point.
pub const FEEDBACK_THRESHOLD: f64 = 0.8;

/// Used when every metric clears the bar but the overall score did not.
pub const GENERIC_FEEDBACK: &str = "Add more technical depth and practical examples.";

fn message_for(metric: &str) -> &'static str {
    match metric {
        "completeness" => "Ensure all learning goals are thoroughly covered.",
        "technical_accuracy" => "Verify technical accuracy and provide more precise explanations.",
        "clarity" => "Improve clarity by breaking down complex concepts.",
        "code_quality" => "Enhance code examples with better comments and explanations.",
        "engagement" => "Make the content more engaging with real-world applications.",
        _ => GENERIC_FEEDBACK,
    }
}

/// One point per metric under [`FEEDBACK_THRESHOLD`], in metric order.
pub fn feedback_points(scores: &QualityScores) -> Vec<&'static str> {
    let points: Vec<&'static str> = scores
        .metrics()
        .iter()
        .filter(|(_, score)| *score < FEEDBACK_THRESHOLD)
        .map(|(name, _)| message_for(name))
        .collect();

    if points.is_empty() {
        vec![GENERIC_FEEDBACK]
    } else {
        points
    }
}

/// Render points as the bullet list stored on the unit.
pub fn render_feedback(points: &[&str]) -> String {
    format!("Automatic feedback:\n- {}", points.join("\n- "))
}

/// [`feedback_points`] rendered with [`render_feedback`].
pub fn auto_feedback(scores: &QualityScores) -> String {
    render_feedback(&feedback_points(scores))
}
