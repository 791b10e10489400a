//! Recipe-shaped views over raw records and retrieved chunks.
//!
//! Ingestion turns a [`Record`] into a metadata object that keeps every raw
//! field and adds parsed numbers for the nutrition columns. Queries project
//! that metadata back into an [`EnrichedRecipe`].

use std::borrow::Cow;

use recipe_source::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::index::QueryResult;

/// Metadata object stored next to every chunk.
pub type Metadata = Map<String, Value>;

/// Servings assumed when a record does not state a usable count.
pub const DEFAULT_SERVINGS: u32 = 4;

/// Title used when a record carries neither `title` nor `recipe_name`.
pub const UNTITLED_RECIPE: &str = "Untitled Recipe";

/// Per-serving macronutrient columns, always parsed.
pub const CORE_NUTRITION_FIELDS: &[&str] = &[
    "calories",
    "protein",
    "carbohydrates",
    "fat",
    "sugar",
    "fiber",
];

/// Vitamin columns and their display labels.
pub const VITAMIN_FIELDS: &[(&str, &str)] = &[
    ("vitamin_a", "vitaminA"),
    ("vitamin_c", "vitaminC"),
    ("vitamin_d", "vitaminD"),
    ("vitamin_e", "vitaminE"),
    ("vitamin_k", "vitaminK"),
    ("thiamin", "thiamin"),
    ("riboflavin", "riboflavin"),
    ("niacin", "niacin"),
    ("vitamin_b6", "b6"),
    ("vitamin_b12", "b12"),
    ("folate", "folate"),
];

/// Mineral columns and their display labels.
pub const MINERAL_FIELDS: &[(&str, &str)] = &[
    ("calcium", "calcium"),
    ("iron", "iron"),
    ("magnesium", "magnesium"),
    ("phosphorus", "phosphorus"),
    ("potassium", "potassium"),
    ("sodium", "sodium"),
    ("zinc", "zinc"),
];

/// Controls how much of a record is parsed during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipeMetadataConfig {
    /// Parse vitamin and mineral columns into numbers as well.
    pub parse_micronutrients: bool,
}

impl Default for RecipeMetadataConfig {
    fn default() -> Self {
        Self {
            parse_micronutrients: true,
        }
    }
}

/// Builds the metadata object for a record.
///
/// Raw values are kept verbatim; parsed nutrition columns replace their raw
/// strings with numbers (0 when missing or unparseable).
pub fn metadata_for(record: &Record, config: &RecipeMetadataConfig) -> Metadata {
    let mut metadata: Metadata = record
        .fields()
        .map(|(field, value)| (field.to_string(), Value::String(value.to_string())))
        .collect();

    let mut parse = |field: &str| {
        let value = parse_number(record.get(field));
        metadata.insert(field.to_string(), number_value(value));
    };
    CORE_NUTRITION_FIELDS.iter().for_each(|field| parse(*field));
    if config.parse_micronutrients {
        VITAMIN_FIELDS
            .iter()
            .chain(MINERAL_FIELDS)
            .for_each(|(field, _)| parse(*field));
    }
    metadata
}

fn number_value(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::Number(Number::from(0)))
}

/// Parses a decimal string the lenient way spreadsheets export them: leading
/// whitespace is ignored, trailing units are dropped, anything else is 0.
pub fn parse_number(raw: Option<&str>) -> f64 {
    raw.and_then(leading_number).unwrap_or(0.0)
}

/// Number that starts `text` (after whitespace), e.g. `"12.5g"` yields 12.5.
pub fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0usize;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if frac_end > frac_start || digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return None;
    }
    text[..end]
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// First number appearing anywhere in `text`, e.g. `"About $3.25 per serving"`
/// yields 3.25.
pub fn first_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    (0..bytes.len())
        .filter(|&idx| {
            bytes[idx].is_ascii_digit()
                || (bytes[idx] == b'.'
                    && bytes.get(idx + 1).is_some_and(|next| next.is_ascii_digit()))
        })
        .find_map(|idx| {
            let negative = idx > 0 && bytes[idx - 1] == b'-';
            leading_number(&text[idx..]).map(|value| if negative { -value } else { value })
        })
}

/// Servings count: leading integer of the raw value, or [`DEFAULT_SERVINGS`]
/// when absent, unparseable, or zero.
pub fn parse_servings(raw: Option<&str>) -> u32 {
    let Some(raw) = raw else {
        return DEFAULT_SERVINGS;
    };
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => DEFAULT_SERVINGS,
        Ok(servings) => servings,
    }
}

/// Reads a numeric metadata field whether it was stored parsed or raw.
pub fn metadata_number(metadata: &Metadata, field: &str) -> f64 {
    match metadata.get(field) {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
        Some(Value::String(raw)) => parse_number(Some(raw)),
        _ => 0.0,
    }
}

/// Reads a textual metadata field; numbers are rendered back to text.
pub fn metadata_text<'a>(metadata: &'a Metadata, field: &str) -> Option<Cow<'a, str>> {
    match metadata.get(field)? {
        Value::String(text) if !text.trim().is_empty() => Some(Cow::Borrowed(text.as_str())),
        Value::Number(number) => Some(Cow::Owned(number.to_string())),
        _ => None,
    }
}

/// Per-serving nutrition figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionInfo {
    /// Energy in kcal.
    pub calories: f64,
    /// Grams of protein.
    pub protein: f64,
    /// Grams of carbohydrates.
    pub carbohydrates: f64,
    /// Grams of fat.
    pub fat: f64,
    /// Grams of sugar.
    pub sugar: f64,
    /// Grams of fiber.
    pub fiber: f64,
    /// Vitamin amounts in mg, keyed by display label in column order.
    pub vitamins: Vec<(String, f64)>,
    /// Mineral amounts in mg, keyed by display label in column order.
    pub minerals: Vec<(String, f64)>,
}

impl NutritionInfo {
    /// Collects nutrition figures from chunk metadata.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let labelled = |fields: &[(&str, &str)]| {
            fields
                .iter()
                .map(|(field, label)| (label.to_string(), metadata_number(metadata, field)))
                .collect()
        };
        Self {
            calories: metadata_number(metadata, "calories"),
            protein: metadata_number(metadata, "protein"),
            carbohydrates: metadata_number(metadata, "carbohydrates"),
            fat: metadata_number(metadata, "fat"),
            sugar: metadata_number(metadata, "sugar"),
            fiber: metadata_number(metadata, "fiber"),
            vitamins: labelled(VITAMIN_FIELDS),
            minerals: labelled(MINERAL_FIELDS),
        }
    }
}

/// Retrieved recipe with derived cost estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecipe {
    /// 1-based similarity rank.
    pub rank: usize,
    /// Cosine distance between the query and the matched chunk.
    pub distance: f32,
    /// Recipe title.
    pub title: String,
    /// Raw ingredient text.
    pub ingredients: String,
    /// Preparation steps (the chunk text when the record had none).
    pub instructions: String,
    /// Servings the recipe makes.
    pub servings: u32,
    /// Estimated cost per serving in USD (0 when unavailable).
    pub cost_per_serving: f64,
    /// `cost_per_serving * servings`.
    pub total_cost: f64,
    /// Nutrition per serving.
    pub nutrition_info: NutritionInfo,
    /// Text of the matched chunk.
    pub content: String,
    /// Full metadata of the originating record.
    pub metadata: Metadata,
}

impl EnrichedRecipe {
    /// Projects a search hit into recipe form with zero-valued costs.
    pub fn from_result(result: QueryResult) -> Self {
        let QueryResult {
            rank,
            content,
            metadata,
            distance,
        } = result;
        let title = metadata_text(&metadata, "title")
            .or_else(|| metadata_text(&metadata, "recipe_name"))
            .map(|title| title.into_owned())
            .unwrap_or_else(|| UNTITLED_RECIPE.to_string());
        let ingredients = metadata_text(&metadata, "ingredients")
            .map(|text| text.into_owned())
            .unwrap_or_default();
        let instructions = metadata_text(&metadata, "instructions")
            .map(|text| text.into_owned())
            .unwrap_or_else(|| content.clone());
        let servings = parse_servings(metadata_text(&metadata, "servings").as_deref());
        let nutrition_info = NutritionInfo::from_metadata(&metadata);
        Self {
            rank,
            distance,
            title,
            ingredients,
            instructions,
            servings,
            cost_per_serving: 0.0,
            total_cost: 0.0,
            nutrition_info,
            content,
            metadata,
        }
    }

    /// Applies a per-serving estimate and derives the total.
    pub fn apply_cost_per_serving(&mut self, cost_per_serving: f64) {
        let cost = if cost_per_serving.is_finite() {
            cost_per_serving
        } else {
            0.0
        };
        self.cost_per_serving = cost;
        self.total_cost = cost * f64::from(self.servings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use recipe_source::{InMemoryRecordSource, RecordSource};

    fn record(csv: &str) -> Record {
        InMemoryRecordSource::new(csv)
            .open()
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn numbers_parse_leniently() {
        assert_eq!(parse_number(Some("12.5")), 12.5);
        assert_eq!(parse_number(Some(" 7g")), 7.0);
        assert_eq!(parse_number(Some(".5")), 0.5);
        assert_eq!(parse_number(Some("3.")), 3.0);
        assert_eq!(parse_number(Some("-2")), -2.0);
        assert_eq!(parse_number(Some("n/a")), 0.0);
        assert_eq!(parse_number(Some("")), 0.0);
        assert_eq!(parse_number(None), 0.0);
    }

    #[test]
    fn first_number_skips_currency_and_prose() {
        assert_eq!(first_number("$3.25"), Some(3.25));
        assert_eq!(first_number("Roughly 2 dollars per serving"), Some(2.0));
        assert_eq!(first_number("about .75 USD"), Some(0.75));
        assert_eq!(first_number("no idea"), None);
    }

    #[test]
    fn servings_default_to_four() {
        assert_eq!(parse_servings(Some("6")), 6);
        assert_eq!(parse_servings(Some("2 people")), 2);
        assert_eq!(parse_servings(Some("0")), DEFAULT_SERVINGS);
        assert_eq!(parse_servings(Some("several")), DEFAULT_SERVINGS);
        assert_eq!(parse_servings(None), DEFAULT_SERVINGS);
    }

    #[test]
    fn metadata_keeps_raw_fields_and_parses_nutrition() {
        let record = record("title,protein,iron,notes\nBean Chili,21.5,bad,spicy\n");
        let metadata = metadata_for(&record, &RecipeMetadataConfig::default());

        assert_eq!(metadata["title"], Value::from("Bean Chili"));
        assert_eq!(metadata["notes"], Value::from("spicy"));
        assert_eq!(metadata_number(&metadata, "protein"), 21.5);
        assert_eq!(metadata_number(&metadata, "calories"), 0.0);
        assert_eq!(metadata["iron"], Value::from(0.0));
    }

    #[test]
    fn micronutrient_parsing_is_optional() {
        let record = record("title,zinc\nOats,1.2\n");
        let config = RecipeMetadataConfig {
            parse_micronutrients: false,
        };
        let metadata = metadata_for(&record, &config);

        assert_eq!(metadata["zinc"], Value::from("1.2"));
        assert!(!metadata.contains_key("vitamin_a"));
        assert_eq!(metadata_number(&metadata, "zinc"), 1.2);
    }

    #[test]
    fn projection_falls_back_for_missing_fields() {
        let mut metadata = Metadata::new();
        metadata.insert("recipe_name".into(), Value::from("Miso Soup"));
        metadata.insert("servings".into(), Value::from("3"));
        let mut recipe = EnrichedRecipe::from_result(QueryResult {
            rank: 1,
            content: "miso tofu scallion".into(),
            metadata,
            distance: 0.1,
        });

        assert_eq!(recipe.title, "Miso Soup");
        assert_eq!(recipe.instructions, "miso tofu scallion");
        assert_eq!(recipe.servings, 3);
        assert_eq!(recipe.total_cost, 0.0);

        recipe.apply_cost_per_serving(1.5);
        assert_eq!(recipe.total_cost, 4.5);

        let untitled = EnrichedRecipe::from_result(QueryResult {
            rank: 2,
            content: String::new(),
            metadata: Metadata::new(),
            distance: 0.4,
        });
        assert_eq!(untitled.title, UNTITLED_RECIPE);
        assert_eq!(untitled.servings, DEFAULT_SERVINGS);
    }
}
