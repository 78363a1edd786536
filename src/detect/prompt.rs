use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

const V1_PROMPT: &str = r#"You are an expert object detection system. Analyze this image of a messy room and identify ALL visible objects.

For EACH distinct object you can see, provide:
1. A clear, specific label (e.g., "blue t-shirt", "iPhone charger", "water bottle")
2. Confidence score (0.0-1.0)
3. Bounding box coordinates (x, y, width, height) as percentages of image dimensions
4. Category (clothes, electronics, papers, books, trash, toiletries, food, furniture, misc)

Rules:
- Detect EVERY visible object, even partially visible ones
- Be specific with labels (not just "item" or "object")
- Include items on surfaces, floor, furniture, in piles
- Distinguish between similar items (e.g., multiple shirts)
- Include small items like pens, cables, wrappers

Return ONLY a JSON object with this exact structure:
{
  "objects": [
    {
      "label": "string",
      "confidence": 0.0-1.0,
      "boundingBox": {"x": 0-100, "y": 0-100, "width": 0-100, "height": 0-100},
      "category": "string"
    }
  ],
  "totalObjectCount": number
}"#;

const V2_PROMPT: &str = r#"You are an advanced object detection system analyzing a messy room. Your task is to identify EVERY visible object, no matter how small or partially visible.

CRITICAL INSTRUCTIONS:
1. Scan the ENTIRE image systematically - left to right, top to bottom
2. Include ALL items, even if they're:
   - Partially visible or obscured
   - Very small (pens, coins, cables)
   - In piles or stacks
   - On the floor, furniture, walls, or any surface
   - In the background

For each object, provide:
- label: Specific name (e.g., "red Nike sneaker", "iPhone charging cable", "crumpled white paper")
- confidence: 0.0-1.0
- boundingBox: {x, y, width, height} as percentages (0-100)
- category: One of [clothes, electronics, papers, books, trash, toiletries, food, furniture, school_supplies, personal_items, misc]

IMPORTANT RULES:
- A messy room typically has 30-60+ visible objects
- Count each distinct item separately (3 shirts = 3 objects)
- Include items like: tissues, wrappers, bottles, chargers, pens, notebooks, bags, shoes, dishes, etc.
- Be EXHAUSTIVE - if you can see it, detect it
- Use descriptive labels with colors/brands when visible

Return ONLY valid JSON:
{
  "objects": [...],
  "totalObjectCount": number,
  "messLevel": "low|medium|high|extreme"
}"#;

const V2_IMPROVEMENTS: &[&str] = &[
    "More explicit instructions to be exhaustive",
    "Emphasis on 30-60+ objects expectation",
    "Better category definitions",
    "Added mess level assessment",
];

/// Prompt configuration sent alongside each image.
///
/// `V1` is the baseline instruction; `V2` pushes the model towards exhaustive
/// detection and asks for a self-reported mess level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptVariant {
    V1,
    V2,
}

impl PromptVariant {
    pub const ALL: [PromptVariant; 2] = [PromptVariant::V1, PromptVariant::V2];

    pub fn label(self) -> &'static str {
        match self {
            PromptVariant::V1 => "v1",
            PromptVariant::V2 => "v2",
        }
    }

    /// Instruction text describing the JSON schema the model must return.
    pub fn prompt(self) -> &'static str {
        match self {
            PromptVariant::V1 => V1_PROMPT,
            PromptVariant::V2 => V2_PROMPT,
        }
    }

    pub fn temperature(self) -> f64 {
        match self {
            PromptVariant::V1 => 0.1,
            PromptVariant::V2 => 0.2,
        }
    }

    /// Results directory name, relative to the configured results root.
    pub fn default_results_dir(self) -> &'static str {
        match self {
            PromptVariant::V1 => "test_results",
            PromptVariant::V2 => "test_results_v2",
        }
    }

    pub fn report_file_name(self) -> &'static str {
        match self {
            PromptVariant::V1 => "accuracy_report.json",
            PromptVariant::V2 => "comparison_report.json",
        }
    }

    /// Variant whose results are compared against by default.
    pub fn baseline(self) -> Option<PromptVariant> {
        match self {
            PromptVariant::V1 => None,
            PromptVariant::V2 => Some(PromptVariant::V1),
        }
    }

    pub fn improvements(self) -> &'static [&'static str] {
        match self {
            PromptVariant::V1 => &[],
            PromptVariant::V2 => V2_IMPROVEMENTS,
        }
    }
}

impl fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PromptVariant {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(PromptVariant::V1),
            "v2" | "2" => Ok(PromptVariant::V2),
            other => Err(anyhow!("unknown prompt variant '{}'; expected v1 or v2", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_variant_labels() {
        assert_eq!("v1".parse::<PromptVariant>().unwrap(), PromptVariant::V1);
        assert_eq!(" V2 ".parse::<PromptVariant>().unwrap(), PromptVariant::V2);
        assert!("v3".parse::<PromptVariant>().is_err());
    }

    #[test]
    fn only_v2_asks_for_mess_level() {
        assert!(!PromptVariant::V1.prompt().contains("messLevel"));
        assert!(PromptVariant::V2.prompt().contains("messLevel"));
        for variant in PromptVariant::ALL {
            assert!(variant.prompt().contains("totalObjectCount"));
        }
    }

    #[test]
    fn v2_compares_against_v1() {
        assert_eq!(PromptVariant::V2.baseline(), Some(PromptVariant::V1));
        assert_eq!(PromptVariant::V1.baseline(), None);
        assert!(PromptVariant::V1.improvements().is_empty());
        assert_eq!(PromptVariant::V2.improvements().len(), 4);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&PromptVariant::V2).unwrap();
        assert_eq!(json, "\"v2\"");
    }
}
