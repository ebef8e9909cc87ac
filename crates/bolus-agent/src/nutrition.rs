//! Nutrition lookup: facts model, source trait, and a simple in-memory table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Matches returned per lookup.
pub const DEFAULT_MATCH_LIMIT: usize = 3;

/// Macronutrients per 100 g plus portion hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionFacts {
    pub food_name: String,
    pub carbs_per_100g: Option<f64>,
    pub protein_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
    /// Reference amount the values are given for, e.g. "100g".
    #[serde(default)]
    pub standard_amount: Option<String>,
    /// Typical single serving, e.g. "250g".
    #[serde(default)]
    pub serving_size: Option<String>,
}

fn grams(value: Option<f64>) -> String {
    value.map(|v| format!("{}g", v)).unwrap_or_else(|| "unknown".to_string())
}

impl fmt::Display for NutritionFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Food: {}", self.food_name)?;
        writeln!(
            f,
            "Carbohydrate: {}, Protein: {}, Fat: {}",
            grams(self.carbs_per_100g),
            grams(self.protein_per_100g),
            grams(self.fat_per_100g)
        )?;
        write!(
            f,
            "Standard amount: {}, Serving size: {}",
            self.standard_amount.as_deref().unwrap_or("no data"),
            self.serving_size.as_deref().unwrap_or("no data")
        )
    }
}

/// Outcome of a lookup. `NotFound` is a valid answer, not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum NutritionLookup {
    Found(Vec<NutritionFacts>),
    NotFound,
}

impl NutritionLookup {
    pub fn from_matches(matches: Vec<NutritionFacts>) -> Self {
        if matches.is_empty() {
            Self::NotFound
        } else {
            Self::Found(matches)
        }
    }

    /// Text placed in the tool-result message.
    pub fn render(&self) -> String {
        match self {
            Self::Found(facts) => facts
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("\n\n"),
            Self::NotFound => "No nutrition information was found for that food.".to_string(),
        }
    }
}

/// Anything that can answer "what is in this food".
#[async_trait]
pub trait NutritionSource: Send + Sync {
    /// Best matches for `query`, most relevant first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NutritionFacts>>;
}

/// Normalized cache key for a query.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Foods held in memory and ranked by name overlap.
#[derive(Debug, Clone, Default)]
pub struct NutritionTable {
    foods: Vec<NutritionFacts>,
}

impl NutritionTable {
    pub fn new(foods: Vec<NutritionFacts>) -> Self {
        Self { foods }
    }

    /// Parse a JSON array of foods.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn len(&self) -> usize {
        self.foods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.foods.is_empty()
    }

    fn score(name: &str, query: &str) -> usize {
        let name = normalize_query(name);
        if name == query {
            return 1000;
        }
        if name.contains(query) {
            return 500 - name.len().min(400);
        }
        if query.contains(&name) {
            return 100 + name.len().min(99);
        }
        let name_tokens: Vec<&str> = name.split(' ').collect();
        query
            .split(' ')
            .filter(|t| name_tokens.contains(t))
            .count()
            * 10
    }

    fn rank(&self, query: &str, limit: usize) -> Vec<NutritionFacts> {
        let query = normalize_query(query);
        if query.is_empty() {
            return vec![];
        }
        let mut scored: Vec<(usize, &NutritionFacts)> = self
            .foods
            .iter()
            .map(|f| (Self::score(&f.food_name, &query), f))
            .filter(|(s, _)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.food_name.cmp(&b.1.food_name)));
        scored.into_iter().take(limit).map(|(_, f)| f.clone()).collect()
    }
}

#[async_trait]
impl NutritionSource for NutritionTable {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NutritionFacts>> {
        Ok(self.rank(query, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn food(name: &str, carbs: f64) -> NutritionFacts {
        NutritionFacts {
            food_name: name.to_string(),
            carbs_per_100g: Some(carbs),
            protein_per_100g: Some(5.0),
            fat_per_100g: Some(3.0),
            standard_amount: Some("100g".into()),
            serving_size: Some("300g".into()),
        }
    }

    fn table() -> NutritionTable {
        NutritionTable::new(vec![
            food("Kimchi fried rice", 24.0),
            food("Fried rice", 28.0),
            food("Ramen", 20.0),
            food("Grapes", 15.0),
            food("Kimchi", 4.0),
        ])
    }

    #[tokio::test]
    async fn test_exact_match_ranks_first() {
        let found = table().search("kimchi", 3).await.unwrap();
        assert_eq!(found[0].food_name, "Kimchi");
        assert_eq!(found[1].food_name, "Kimchi fried rice");
    }

    #[tokio::test]
    async fn test_limit_and_no_match() {
        let t = table();
        assert_eq!(t.search("fried rice", 1).await.unwrap().len(), 1);
        assert!(t.search("pizza", 3).await.unwrap().is_empty());
        assert!(t.search("   ", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_overlap() {
        let found = table().search("green grapes", 3).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].food_name, "Grapes");
    }

    #[test]
    fn test_render_not_found() {
        let lookup = NutritionLookup::from_matches(vec![]);
        assert_eq!(lookup, NutritionLookup::NotFound);
        assert!(lookup.render().contains("No nutrition information"));
    }

    #[test]
    fn test_render_found_lists_serving_size() {
        let lookup = NutritionLookup::from_matches(vec![food("Ramen", 20.0)]);
        let text = lookup.render();
        assert!(text.contains("Food: Ramen"));
        assert!(text.contains("Carbohydrate: 20g"));
        assert!(text.contains("Serving size: 300g"));
    }

    #[test]
    fn test_from_json_defaults_optional_hints() {
        let t = NutritionTable::from_json(
            r#"[{"food_name":"Banana","carbs_per_100g":22.8,"protein_per_100g":1.1,"fat_per_100g":0.3}]"#,
        )
        .unwrap();
        assert_eq!(t.len(), 1);
        assert!(t.foods[0].serving_size.is_none());
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  Kimchi   Fried RICE "), "kimchi fried rice");
    }
}
