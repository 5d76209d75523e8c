use crate::error::Result;
use crate::models::{PipelineEvent, Recognition};
use std::collections::BTreeMap;

pub fn format_recognition(recognition: &Recognition) -> String {
    format!("{} ({:.3})", recognition.label, recognition.confidence)
}

/// One recognition per line, in delivery order.
pub fn format_recognitions(recognitions: &[Recognition]) -> String {
    recognitions
        .iter()
        .map(format_recognition)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text a display surface shows for an event: the stage name, the result lines, or the error message.
pub fn render_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::Status(message) => message.clone(),
        PipelineEvent::Result(recognitions) => format_recognitions(recognitions),
        PipelineEvent::Failure(err) => err.to_string(),
    }
}

/// Results keyed by photo name, as a pretty-printed JSON object.
pub fn results_to_json(results: &BTreeMap<String, Vec<Recognition>>) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn result_lines_follow_delivery_order() {
        let list = vec![
            Recognition::new("dog", 0.9),
            Recognition::new("fish", 0.5),
            Recognition::new("cat", 0.2),
        ];
        assert_eq!(
            format_recognitions(&list),
            "dog (0.900)\nfish (0.500)\ncat (0.200)"
        );
        assert_eq!(format_recognitions(&[]), "");
    }

    #[test]
    fn events_render_as_plain_text() {
        assert_eq!(render_event(&PipelineEvent::Status("start".into())), "start");
        let failure = PipelineEvent::Failure(Error::InvalidArgument("cannot scale a 0x0 image".into()));
        assert_eq!(
            render_event(&failure),
            "Invalid Argument: cannot scale a 0x0 image"
        );
        let done = PipelineEvent::Result(vec![Recognition::new("tabby", 0.72)]);
        assert_eq!(render_event(&done), "tabby (0.720)");
    }

    #[test]
    fn json_is_keyed_by_photo_and_omits_missing_location() {
        let mut results = BTreeMap::new();
        results.insert("a.jpg".to_string(), vec![Recognition::new("dog", 0.5)]);
        let json = results_to_json(&results).unwrap();
        let parsed: BTreeMap<String, Vec<Recognition>> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, results);
        assert!(!json.contains("location"));
    }
}
