// 🏛️ Column Dictionary - Attribute Registry
// Every column of the star schema is defined once here; tables reference them by name

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// ATTRIBUTE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    Integer,
    Text,
    /// Boolean stored as INTEGER 0/1
    Flag,
}

impl AttributeType {
    /// SQLite storage type
    pub fn sql_type(&self) -> &'static str {
        match self {
            AttributeType::Integer | AttributeType::Flag => "INTEGER",
            AttributeType::Text => "TEXT",
        }
    }
}

/// A single column value as seen by validation
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
    Flag(bool),
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationRule {
    Required,
    Range { min: i64, max: i64 },
    Min(i64),
    OneOf(Vec<String>),
}

impl ValidationRule {
    /// Check a value; returns a failure message, or None when the rule holds.
    /// Missing values only fail `Required`.
    pub fn check(&self, value: &AttributeValue) -> Option<String> {
        match (self, value) {
            (ValidationRule::Required, AttributeValue::Missing) => {
                Some("Required value is missing".to_string())
            }
            (ValidationRule::Required, AttributeValue::Text(s)) if s.trim().is_empty() => {
                Some("Required value is empty".to_string())
            }
            (ValidationRule::Range { min, max }, AttributeValue::Integer(v)) => {
                if v < min || v > max {
                    Some(format!("Must be between {} and {}, got {}", min, max, v))
                } else {
                    None
                }
            }
            (ValidationRule::Min(min), AttributeValue::Integer(v)) => {
                if v < min {
                    Some(format!("Must be at least {}, got {}", min, v))
                } else {
                    None
                }
            }
            (ValidationRule::OneOf(values), AttributeValue::Text(s)) => {
                if values.iter().any(|known| known == s) {
                    None
                } else {
                    Some(format!("Unknown value '{}'", s))
                }
            }
            _ => None,
        }
    }
}

// ============================================================================
// ATTRIBUTE DEFINITION
// ============================================================================

/// AttributeDefinition - one column, independent of the table it lands in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Unique ID (e.g., "attr:age")
    pub id: String,

    /// Column name (e.g., "age")
    pub name: String,

    pub type_: AttributeType,

    pub description: String,

    pub validation_rules: Vec<ValidationRule>,

    /// Where does this value come from?
    pub provenance_info: String,

    pub examples: Vec<String>,
}

impl AttributeDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, type_: AttributeType) -> Self {
        AttributeDefinition {
            id: id.into(),
            name: name.into(),
            type_,
            description: String::new(),
            validation_rules: Vec::new(),
            provenance_info: String::new(),
            examples: Vec::new(),
        }
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: add validation rule
    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    /// Builder: add provenance info
    pub fn with_provenance(mut self, info: impl Into<String>) -> Self {
        self.provenance_info = info.into();
        self
    }

    /// Builder: add example
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.validation_rules.contains(&ValidationRule::Required)
    }

    /// Run every rule; collects failure messages
    pub fn validate(&self, value: &AttributeValue) -> Vec<(ValidationRule, String)> {
        self.validation_rules
            .iter()
            .filter_map(|rule| rule.check(value).map(|msg| (rule.clone(), msg)))
            .collect()
    }
}

fn one_of(values: &[&str]) -> ValidationRule {
    ValidationRule::OneOf(values.iter().map(|v| v.to_string()).collect())
}

pub const JOBS: &[&str] = &[
    "admin.",
    "blue-collar",
    "entrepreneur",
    "housemaid",
    "management",
    "retired",
    "self-employed",
    "services",
    "student",
    "technician",
    "unemployed",
    "unknown",
];

pub const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const YES_NO: &[&str] = &["yes", "no", "unknown"];

// ============================================================================
// ATTRIBUTE REGISTRY
// ============================================================================

/// AttributeRegistry - the data dictionary of the bank marketing dataset
pub struct AttributeRegistry {
    attributes: HashMap<String, AttributeDefinition>,
}

impl AttributeRegistry {
    /// Create a registry holding every dataset column
    pub fn new() -> Self {
        let mut registry = AttributeRegistry {
            attributes: HashMap::new(),
        };

        registry.register_core_attributes();
        registry
    }

    fn register_core_attributes(&mut self) {
        // ====================================================================
        // CLIENT ATTRIBUTES
        // ====================================================================

        self.register(
            AttributeDefinition::new("attr:age", "age", AttributeType::Integer)
                .with_description("Client age in years")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::Range { min: 18, max: 100 })
                .with_provenance("CSV column 'age'")
                .with_example("30"),
        );

        self.register(
            AttributeDefinition::new("attr:age_group", "age_group", AttributeType::Text)
                .with_description("Age bucket used by the exploration views")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(&["18-29", "30-44", "45-59", "60+"]))
                .with_provenance("Derived from age during star projection")
                .with_example("30-44"),
        );

        self.register(
            AttributeDefinition::new("attr:job", "job", AttributeType::Text)
                .with_description("Type of job")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(JOBS))
                .with_provenance("CSV column 'job'")
                .with_example("management"),
        );

        self.register(
            AttributeDefinition::new("attr:marital", "marital", AttributeType::Text)
                .with_description("Marital status")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(&["married", "single", "divorced", "unknown"]))
                .with_provenance("CSV column 'marital'")
                .with_example("married"),
        );

        self.register(
            AttributeDefinition::new("attr:education", "education", AttributeType::Text)
                .with_description("Education level")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(&["primary", "secondary", "tertiary", "unknown"]))
                .with_provenance("CSV column 'education'")
                .with_example("tertiary"),
        );

        self.register(
            AttributeDefinition::new("attr:credit_default", "credit_default", AttributeType::Text)
                .with_description("Has credit in default?")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(YES_NO))
                .with_provenance("CSV column 'default' (renamed, SQL keyword)")
                .with_example("no"),
        );

        self.register(
            AttributeDefinition::new("attr:balance", "balance", AttributeType::Integer)
                .with_description("Average yearly balance in euros (optional column)")
                .with_provenance("CSV column 'balance'")
                .with_example("1787"),
        );

        self.register(
            AttributeDefinition::new("attr:housing", "housing", AttributeType::Text)
                .with_description("Has housing loan?")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(YES_NO))
                .with_provenance("CSV column 'housing'")
                .with_example("yes"),
        );

        self.register(
            AttributeDefinition::new("attr:loan", "loan", AttributeType::Text)
                .with_description("Has personal loan?")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(YES_NO))
                .with_provenance("CSV column 'loan'")
                .with_example("no"),
        );

        // ====================================================================
        // CONTACT ATTRIBUTES
        // ====================================================================

        self.register(
            AttributeDefinition::new("attr:contact", "contact", AttributeType::Text)
                .with_description("Contact communication type")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(&["cellular", "telephone", "unknown"]))
                .with_provenance("CSV column 'contact'")
                .with_example("cellular"),
        );

        self.register(
            AttributeDefinition::new("attr:month", "month", AttributeType::Text)
                .with_description("Last contact month of year")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(MONTHS))
                .with_provenance("CSV column 'month'")
                .with_example("may"),
        );

        self.register(
            AttributeDefinition::new("attr:day", "day", AttributeType::Integer)
                .with_description("Last contact day of the month")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::Range { min: 1, max: 31 })
                .with_provenance("CSV column 'day'")
                .with_example("19"),
        );

        self.register(
            AttributeDefinition::new("attr:duration", "duration", AttributeType::Integer)
                .with_description("Last contact duration in seconds")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::Min(0))
                .with_provenance("CSV column 'duration'")
                .with_example("79"),
        );

        self.register(
            AttributeDefinition::new("attr:duration_length", "duration_length", AttributeType::Text)
                .with_description("Contact duration bucket")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(&["short", "medium", "long"]))
                .with_provenance("Derived from duration during star projection")
                .with_example("short"),
        );

        // ====================================================================
        // CAMPAIGN ATTRIBUTES
        // ====================================================================

        self.register(
            AttributeDefinition::new("attr:campaign", "campaign", AttributeType::Integer)
                .with_description("Contacts performed during this campaign for this client")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::Min(1))
                .with_provenance("CSV column 'campaign'")
                .with_example("1"),
        );

        self.register(
            AttributeDefinition::new("attr:pdays", "pdays", AttributeType::Integer)
                .with_description("Days since the client was last contacted (-1: never)")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::Min(-1))
                .with_provenance("CSV column 'pdays'")
                .with_example("-1"),
        );

        self.register(
            AttributeDefinition::new("attr:previous", "previous", AttributeType::Integer)
                .with_description("Contacts performed before this campaign")
                .with_validation(ValidationRule::Required)
                .with_validation(ValidationRule::Min(0))
                .with_provenance("CSV column 'previous'")
                .with_example("0"),
        );

        self.register(
            AttributeDefinition::new("attr:poutcome", "poutcome", AttributeType::Text)
                .with_description("Outcome of the previous marketing campaign")
                .with_validation(ValidationRule::Required)
                .with_validation(one_of(&[
                    "success",
                    "failure",
                    "other",
                    "unknown",
                    "nonexistent",
                ]))
                .with_provenance("CSV column 'poutcome'")
                .with_example("unknown"),
        );

        // ====================================================================
        // OUTCOME
        // ====================================================================

        self.register(
            AttributeDefinition::new("attr:subscribed", "subscribed", AttributeType::Flag)
                .with_description("Client subscribed a term deposit")
                .with_validation(ValidationRule::Required)
                .with_provenance("CSV column 'y' (yes/no)")
                .with_example("no"),
        );
    }

    /// Register a new attribute
    pub fn register(&mut self, attr: AttributeDefinition) {
        self.attributes.insert(attr.id.clone(), attr);
    }

    /// Get attribute definition by ID
    pub fn get(&self, id: &str) -> Option<&AttributeDefinition> {
        self.attributes.get(id)
    }

    /// Get attribute definition by column name
    pub fn get_by_name(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.values().find(|attr| attr.name == name)
    }

    /// All attributes sorted by name
    pub fn list_all(&self) -> Vec<&AttributeDefinition> {
        let mut all: Vec<_> = self.attributes.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn count(&self) -> usize {
        self.attributes.len()
    }
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_registry_creation() {
        let registry = AttributeRegistry::new();
        assert_eq!(registry.count(), 19, "Registry should hold every dataset column");
    }

    #[test]
    fn test_get_attribute_by_id_and_name() {
        let registry = AttributeRegistry::new();

        let attr = registry.get("attr:credit_default");
        assert!(attr.is_some());
        assert_eq!(attr.unwrap().name, "credit_default");

        let by_name = registry.get_by_name("poutcome").unwrap();
        assert_eq!(by_name.id, "attr:poutcome");
        assert!(registry.get_by_name("merchant").is_none());
    }

    #[test]
    fn test_balance_is_optional() {
        let registry = AttributeRegistry::new();
        let balance = registry.get_by_name("balance").unwrap();

        assert!(!balance.is_required());
        assert!(balance.validate(&AttributeValue::Missing).is_empty());
    }

    #[test]
    fn test_range_rule() {
        let rule = ValidationRule::Range { min: 1, max: 31 };

        assert!(rule.check(&AttributeValue::Integer(1)).is_none());
        assert!(rule.check(&AttributeValue::Integer(31)).is_none());
        assert!(rule.check(&AttributeValue::Integer(32)).is_some());
        assert!(rule.check(&AttributeValue::Missing).is_none());
    }

    #[test]
    fn test_one_of_rule() {
        let registry = AttributeRegistry::new();
        let month = registry.get_by_name("month").unwrap();

        assert!(month.validate(&AttributeValue::Text("may".to_string())).is_empty());

        let failures = month.validate(&AttributeValue::Text("May".to_string()));
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("Unknown value"));
    }

    #[test]
    fn test_required_rejects_blank_text() {
        let registry = AttributeRegistry::new();
        let job = registry.get_by_name("job").unwrap();

        let failures = job.validate(&AttributeValue::Text("  ".to_string()));
        assert!(failures.iter().any(|(rule, _)| *rule == ValidationRule::Required));
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(AttributeType::Flag.sql_type(), "INTEGER");
        assert_eq!(AttributeType::Text.sql_type(), "TEXT");
    }
}
