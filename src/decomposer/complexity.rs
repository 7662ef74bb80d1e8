/// Eight-signal complexity profile detected over the lowercased question.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityIndicators {
    pub has_aggregation: bool,
    pub has_grouping: bool,
    pub has_filtering: bool,
    pub has_sorting: bool,
    pub has_joining: bool,
    pub has_comparison: bool,
    pub has_temporal: bool,
    pub has_multiple_entities: bool,
}

const AGGREGATION: &[&str] = &["count", "sum", "avg", "average", "max", "min", "total"];
const GROUPING: &[&str] = &["group by", "each", "per", "by category", "by type"];
const FILTERING: &[&str] = &[
    "where", "filter", "only", "exclude", "include", "more than", "less than", "greater", "who",
];
const SORTING: &[&str] = &["order", "sort", "highest", "lowest", "top", "bottom"];
const JOINING: &[&str] = &["and", "with", "from", "in", "of"];
const COMPARISON: &[&str] = &[
    "more than",
    "less than",
    "greater",
    "smaller",
    "above",
    "below",
    "between",
];
const TEMPORAL: &[&str] = &[
    "year", "month", "day", "date", "time", "recent", "last", "first",
];
const ENTITY_WORDS: &[&str] = &[
    "table", "user", "customer", "order", "product", "item", "person", "company", "employee",
    "school", "city",
];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

impl ComplexityIndicators {
    pub fn analyze(question: &str) -> Self {
        let text = question.to_lowercase();

        let entity_mentions = ENTITY_WORDS
            .iter()
            .filter(|word| {
                text.split(|c: char| !c.is_alphanumeric())
                    .any(|token| token.starts_with(*word))
            })
            .count();

        Self {
            has_aggregation: contains_any(&text, AGGREGATION),
            has_grouping: contains_any(&text, GROUPING),
            has_filtering: contains_any(&text, FILTERING),
            has_sorting: contains_any(&text, SORTING),
            has_joining: contains_any(&text, JOINING),
            has_comparison: contains_any(&text, COMPARISON),
            has_temporal: contains_any(&text, TEMPORAL),
            has_multiple_entities: entity_mentions > 1,
        }
    }

    pub fn score(&self) -> usize {
        [
            self.has_aggregation,
            self.has_grouping,
            self.has_filtering,
            self.has_sorting,
            self.has_joining,
            self.has_comparison,
            self.has_temporal,
            self.has_multiple_entities,
        ]
        .iter()
        .filter(|v| **v)
        .count()
    }

    pub fn is_simple(&self) -> bool {
        self.score() <= 2
    }

    pub fn is_complex(&self) -> bool {
        self.score() >= 4
    }

    pub fn active_labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.has_aggregation {
            labels.push("Aggregation");
        }
        if self.has_grouping {
            labels.push("Grouping");
        }
        if self.has_filtering {
            labels.push("Filtering");
        }
        if self.has_sorting {
            labels.push("Sorting");
        }
        if self.has_joining {
            labels.push("Joining");
        }
        if self.has_comparison {
            labels.push("Comparison");
        }
        if self.has_temporal {
            labels.push("Temporal reasoning");
        }
        if self.has_multiple_entities {
            labels.push("Multiple entities");
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lookup_is_simple() {
        let indicators = ComplexityIndicators::analyze("List all schools");
        assert!(indicators.is_simple());
    }

    #[test]
    fn aggregation_with_grouping_and_comparison_is_complex() {
        let indicators = ComplexityIndicators::analyze(
            "Show the average order total per customer for customers who spent more than 100 in the last year",
        );
        assert!(indicators.has_aggregation);
        assert!(indicators.has_grouping);
        assert!(indicators.has_comparison);
        assert!(indicators.has_temporal);
        assert!(indicators.is_complex());
    }

    #[test]
    fn multiple_entity_detection() {
        let indicators =
            ComplexityIndicators::analyze("customers and their orders with products");
        assert!(indicators.has_multiple_entities);

        let single = ComplexityIndicators::analyze("show users");
        assert!(!single.has_multiple_entities);
    }

    #[test]
    fn score_counts_true_indicators() {
        let indicators = ComplexityIndicators {
            has_aggregation: true,
            has_filtering: true,
            has_sorting: true,
            ..Default::default()
        };
        assert_eq!(indicators.score(), 3);
        assert!(!indicators.is_simple());
        assert!(!indicators.is_complex());
    }
}
