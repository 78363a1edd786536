//! Extraction of the detection JSON embedded in a model reply.
//!
//! Replies are free text: the JSON object may be wrapped in prose or a
//! markdown fence. The span from the first `{` to the last `}` is parsed and
//! anything that does not yield an `objects` array becomes a failure outcome
//! carrying the raw reply.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use crate::detect::{
    number_from_value, DetectedObject, DetectionOutcome, DetectionPayload, MessLevel,
};

pub const NO_JSON_ERROR: &str = "No JSON found in response";
pub const NO_OBJECTS_ERROR: &str = "response JSON has no objects key";

/// Substring from the first `{` to the last `}`, inclusive.
pub fn json_span(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

/// Turn a reply into a success or failure outcome. Never fails.
pub fn extract_detection(content: &str) -> DetectionOutcome {
    let Some(span) = json_span(content) else {
        return DetectionOutcome::failure(NO_JSON_ERROR, Some(content));
    };
    let value: Value = match serde_json::from_str(span) {
        Ok(value) => value,
        Err(err) => {
            return DetectionOutcome::failure(
                format!("invalid JSON in response: {}", err),
                Some(content),
            )
        }
    };
    match parse_payload(value) {
        Ok(payload) => DetectionOutcome::Success(payload),
        Err(err) => DetectionOutcome::failure(format!("{:#}", err), Some(content)),
    }
}

/// Interpret a parsed JSON value as a detection payload.
pub fn parse_payload(value: Value) -> Result<DetectionPayload> {
    let Value::Object(mut map) = value else {
        bail!("response JSON is not an object");
    };
    let items = match map.remove("objects") {
        Some(Value::Array(items)) => items,
        Some(_) => bail!("objects is not an array"),
        None => bail!(NO_OBJECTS_ERROR),
    };
    let objects = items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            parse_object(item).with_context(|| format!("invalid object at index {}", idx))
        })
        .collect::<Result<Vec<_>>>()?;
    let total_object_count = map
        .remove("totalObjectCount")
        .and_then(|count| as_count(&count))
        .unwrap_or(objects.len() as u64);
    let mess_level = match map.remove("messLevel") {
        Some(Value::String(level)) => Some(MessLevel::from(level)),
        Some(other) => {
            map.insert(raw_key("messLevel"), other);
            None
        }
        None => None,
    };
    Ok(DetectionPayload {
        objects,
        total_object_count,
        mess_level,
        extra: map,
    })
}

/// One entry of `objects`. Fields of the wrong JSON type are moved to
/// `<field>Raw` so the object still counts.
fn parse_object(item: Value) -> Result<DetectedObject> {
    let Value::Object(mut fields) = item else {
        bail!("not a JSON object");
    };
    for key in ["label", "category"] {
        if fields.get(key).is_some_and(|v| !v.is_string() && !v.is_null()) {
            stash_raw(&mut fields, key);
        }
    }
    if fields
        .get("confidence")
        .is_some_and(|v| !v.is_null() && number_from_value(v).is_none())
    {
        stash_raw(&mut fields, "confidence");
    }
    if fields
        .get("boundingBox")
        .is_some_and(|v| !v.is_object() && !v.is_null())
    {
        stash_raw(&mut fields, "boundingBox");
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}

fn stash_raw(fields: &mut Map<String, Value>, key: &str) {
    if let Some(value) = fields.remove(key) {
        fields.insert(raw_key(key), value);
    }
}

fn raw_key(key: &str) -> String {
    format!("{}Raw", key)
}

fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|count| count.is_finite() && *count >= 0.0)
            .map(|count| count.round() as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure_error(outcome: &DetectionOutcome) -> String {
        outcome.error().expect("failure outcome").to_string()
    }

    #[test]
    fn objects_inside_prose_are_extracted() {
        let outcome =
            extract_detection("Sure! Here you go: {\"objects\": []} Let me know if you need more.");
        let payload = outcome.payload().expect("success");
        assert!(payload.objects.is_empty());
        assert_eq!(payload.total_object_count, 0);
        assert_eq!(payload.mess_level, None);
    }

    #[test]
    fn fenced_reply_with_mess_level() {
        let reply = r#"```json
{
  "objects": [
    {"label": "red sneaker", "confidence": 0.93, "boundingBox": {"x": 10, "y": 70, "width": 8, "height": 6}, "category": "clothes"},
    {"label": "pen", "confidence": 0.42, "category": "school_supplies"}
  ],
  "totalObjectCount": 41,
  "messLevel": "High"
}
```"#;
        let outcome = extract_detection(reply);
        let payload = outcome.payload().expect("success");
        assert_eq!(payload.objects.len(), 2);
        assert_eq!(payload.total_object_count, 41);
        assert_eq!(payload.mess_level, Some(MessLevel::High));
        let sneaker = &payload.objects[0];
        assert_eq!(sneaker.label.as_deref(), Some("red sneaker"));
        assert_eq!(
            sneaker.bounding_box.as_ref().and_then(|b| b.width),
            Some(8.0)
        );
        assert!(payload.objects[1].bounding_box.is_none());
    }

    #[test]
    fn missing_total_defaults_to_object_count() {
        let outcome = extract_detection(r#"{"objects": [{"label": "cup"}, {"label": "plate"}]}"#);
        assert_eq!(outcome.payload().unwrap().total_object_count, 2);

        let outcome = extract_detection(r#"{"objects": [], "totalObjectCount": 12.0}"#);
        assert_eq!(outcome.payload().unwrap().total_object_count, 12);
    }

    #[test]
    fn reply_without_braces_is_a_failure() {
        let outcome = extract_detection("I cannot help with that.");
        assert_eq!(failure_error(&outcome), NO_JSON_ERROR);
        match outcome {
            DetectionOutcome::Failure(failure) => {
                assert_eq!(failure.raw_content.as_deref(), Some("I cannot help with that."));
            }
            DetectionOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn reversed_braces_are_a_failure() {
        let outcome = extract_detection("} nothing here {");
        assert_eq!(failure_error(&outcome), NO_JSON_ERROR);
    }

    #[test]
    fn malformed_json_is_a_failure() {
        let outcome = extract_detection(r#"{"objects": [ {"label": "sock",, } ]}"#);
        assert!(failure_error(&outcome).starts_with("invalid JSON in response"));
    }

    #[test]
    fn json_without_objects_is_a_failure() {
        let outcome = extract_detection(r#"{"items": [{"label": "sock"}]}"#);
        assert_eq!(failure_error(&outcome), NO_OBJECTS_ERROR);

        let outcome = extract_detection(r#"{"objects": "none"}"#);
        assert_eq!(failure_error(&outcome), "objects is not an array");
    }

    #[test]
    fn malformed_object_names_its_index() {
        let outcome = extract_detection(r#"{"objects": [{"label": "ok"}, "sock"]}"#);
        assert!(failure_error(&outcome).starts_with("invalid object at index 1"));
    }

    #[test]
    fn unknown_top_level_keys_are_kept() {
        let outcome = extract_detection(r#"{"objects": [], "notes": "dim lighting"}"#);
        let payload = outcome.payload().unwrap();
        assert_eq!(payload.extra.get("notes"), Some(&Value::from("dim lighting")));
    }

    #[test]
    fn null_box_coordinate_keeps_the_reply_successful() {
        let outcome = extract_detection(
            r#"{"objects":[{"label":"sock","confidence":0.9,"boundingBox":{"x":null,"y":1,"width":2,"height":3},"category":"clothes"}]}"#,
        );
        let payload = outcome.payload().expect("success");
        assert_eq!(payload.objects.len(), 1);
        assert_eq!(payload.total_object_count, 1);
        let bbox = payload.objects[0].bounding_box.as_ref().unwrap();
        assert_eq!(bbox.x, None);
        assert_eq!(bbox.height, Some(3.0));
    }

    #[test]
    fn string_confidence_is_read_as_a_number() {
        let outcome = extract_detection(
            r#"{"objects":[{"label":"sock","confidence":"0.9","category":"clothes"}]}"#,
        );
        let payload = outcome.payload().expect("success");
        assert_eq!(payload.objects[0].confidence, Some(0.9));
    }

    #[test]
    fn mistyped_object_fields_are_kept_raw() {
        let outcome = extract_detection(
            r#"{"objects":[{"label":7,"confidence":"very sure","boundingBox":"top left","category":"toys"}]}"#,
        );
        let payload = outcome.payload().expect("success");
        let object = &payload.objects[0];
        assert_eq!(object.label, None);
        assert_eq!(object.confidence, None);
        assert!(object.bounding_box.is_none());
        assert_eq!(object.category_or_unknown(), "toys");
        assert_eq!(object.extra.get("labelRaw"), Some(&Value::from(7)));
        assert_eq!(object.extra.get("confidenceRaw"), Some(&Value::from("very sure")));
        assert_eq!(object.extra.get("boundingBoxRaw"), Some(&Value::from("top left")));

        // Raw fields survive a write and read back as a success.
        let json = serde_json::to_string(&outcome).unwrap();
        let reloaded: DetectionOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, outcome);
    }

    #[test]
    fn non_string_mess_level_is_kept_raw() {
        let outcome = extract_detection(r#"{"objects": [], "messLevel": 3}"#);
        let payload = outcome.payload().expect("success");
        assert_eq!(payload.mess_level, None);
        assert_eq!(payload.extra.get("messLevelRaw"), Some(&Value::from(3)));

        let outcome = extract_detection(r#"{"objects": [], "messLevel": null}"#);
        let payload = outcome.payload().expect("success");
        assert_eq!(payload.extra.get("messLevelRaw"), Some(&Value::Null));
    }
}
