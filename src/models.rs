//! Data models shared by the resolver, the lifecycle and the wizard

use serde::{Deserialize, Serialize};

/// How an invited partner is responsible for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsibilityMode {
    /// Supplies or edits the data. At most one active grant per unit.
    Contribute,
    /// Inspects and attests existing data. Any number of grants per unit.
    Review,
}

impl ResponsibilityMode {
    pub const ALL: [ResponsibilityMode; 2] =
        [ResponsibilityMode::Contribute, ResponsibilityMode::Review];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponsibilityMode::Contribute => "contribute",
            ResponsibilityMode::Review => "review",
        }
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, ResponsibilityMode::Contribute)
    }
}

impl std::str::FromStr for ResponsibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contribute" => Ok(ResponsibilityMode::Contribute),
            "review" => Ok(ResponsibilityMode::Review),
            _ => Err(format!("Invalid responsibility mode: {}", s)),
        }
    }
}

/// The grain at which responsibility is delegated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponsibilityUnit {
    /// A whole block, covering every field and every present or future instance
    Block { block_id: String },
    /// One instance of one field
    Field {
        field_id: String,
        instance_id: String,
    },
}

impl ResponsibilityUnit {
    pub fn block(block_id: impl Into<String>) -> Self {
        ResponsibilityUnit::Block {
            block_id: block_id.into(),
        }
    }

    pub fn field(field_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        ResponsibilityUnit::Field {
            field_id: field_id.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, ResponsibilityUnit::Block { .. })
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            ResponsibilityUnit::Block { .. } => "block",
            ResponsibilityUnit::Field { .. } => "field",
        }
    }
}

impl std::fmt::Display for ResponsibilityUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponsibilityUnit::Block { block_id } => write!(f, "block:{}", block_id),
            ResponsibilityUnit::Field {
                field_id,
                instance_id,
            } => write!(f, "field:{}:{}", field_id, instance_id),
        }
    }
}

/// Check that a set of units uses a single granularity
pub fn is_homogeneous<'a>(units: impl IntoIterator<Item = &'a ResponsibilityUnit>) -> bool {
    let mut kinds = units.into_iter().map(|u| u.is_block());
    match kinds.next() {
        Some(first) => kinds.all(|k| k == first),
        None => true,
    }
}

/// Partner roles offered to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerRole {
    Manufacturer,
    MaterialSupplier,
    ComponentSupplier,
    Recycler,
    Other,
}

impl PartnerRole {
    pub const ALL: [PartnerRole; 5] = [
        PartnerRole::Manufacturer,
        PartnerRole::MaterialSupplier,
        PartnerRole::ComponentSupplier,
        PartnerRole::Recycler,
        PartnerRole::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerRole::Manufacturer => "manufacturer",
            PartnerRole::MaterialSupplier => "material_supplier",
            PartnerRole::ComponentSupplier => "component_supplier",
            PartnerRole::Recycler => "recycler",
            PartnerRole::Other => "other",
        }
    }

    /// Label shown to operators and used in invitation messages
    pub fn label(&self) -> &'static str {
        match self {
            PartnerRole::Manufacturer => "Manufacturer",
            PartnerRole::MaterialSupplier => "Material supplier",
            PartnerRole::ComponentSupplier => "Component supplier",
            PartnerRole::Recycler => "Recycler",
            PartnerRole::Other => "Other",
        }
    }
}

impl std::str::FromStr for PartnerRole {
    type Err = String;

    /// Accepts either the snake_case key or the display label, ignoring case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        if needle.is_empty() {
            return Err("Role is required".to_string());
        }
        PartnerRole::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(needle) || r.label().eq_ignore_ascii_case(needle))
            .ok_or_else(|| format!("Invalid partner role: {}", needle))
    }
}

/// Contact details of the invited partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Contact {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            company: None,
            message: None,
        }
    }

    /// Trim every field, lowercase the address and drop blank optionals.
    /// Fails when the address is not syntactically deliverable.
    pub fn normalized(self) -> Result<Self, String> {
        let email = normalize_email(&self.email)?;
        Ok(Self {
            email,
            name: non_blank(self.name),
            company: non_blank(self.company),
            message: non_blank(self.message),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Format-only address check; deliverability belongs to the notification side.
pub fn normalize_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(format!("Invalid email address: {}", email));
    }
    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| format!("Invalid email address: {}", email))?;
    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && !domain.contains('@');
    if local.is_empty() || !domain_ok {
        return Err(format!("Invalid email address: {}", email));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip_str() {
        for mode in ResponsibilityMode::ALL {
            assert_eq!(mode.as_str().parse::<ResponsibilityMode>().unwrap(), mode);
        }
        assert!("declaration".parse::<ResponsibilityMode>().is_err());
    }

    #[test]
    fn test_only_contribute_is_exclusive() {
        assert!(ResponsibilityMode::Contribute.is_exclusive());
        assert!(!ResponsibilityMode::Review.is_exclusive());
    }

    #[test]
    fn test_unit_serialization() {
        let unit = ResponsibilityUnit::field("certificates", "cert-1");
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["kind"], "field");
        assert_eq!(json["field_id"], "certificates");
        assert_eq!(json["instance_id"], "cert-1");

        let block: ResponsibilityUnit =
            serde_json::from_str(r#"{"kind":"block","block_id":"materials"}"#).unwrap();
        assert_eq!(block, ResponsibilityUnit::block("materials"));
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(ResponsibilityUnit::block("b").to_string(), "block:b");
        assert_eq!(ResponsibilityUnit::field("f", "f-0").to_string(), "field:f:f-0");
    }

    #[test]
    fn test_homogeneous_units() {
        let blocks = vec![ResponsibilityUnit::block("a"), ResponsibilityUnit::block("b")];
        let fields = vec![
            ResponsibilityUnit::field("x", "x-0"),
            ResponsibilityUnit::field("y", "y-0"),
        ];
        let mixed = vec![ResponsibilityUnit::block("a"), ResponsibilityUnit::field("x", "x-0")];

        assert!(is_homogeneous(&blocks));
        assert!(is_homogeneous(&fields));
        assert!(!is_homogeneous(&mixed));
        assert!(is_homogeneous(&Vec::new()));
    }

    #[test]
    fn test_partner_role_parsing() {
        assert_eq!("recycler".parse::<PartnerRole>().unwrap(), PartnerRole::Recycler);
        assert_eq!(
            "Material supplier".parse::<PartnerRole>().unwrap(),
            PartnerRole::MaterialSupplier
        );
        assert_eq!(
            " component_supplier ".parse::<PartnerRole>().unwrap(),
            PartnerRole::ComponentSupplier
        );
        assert!("".parse::<PartnerRole>().is_err());
        assert!("logistics".parse::<PartnerRole>().is_err());
    }

    #[test]
    fn test_partner_role_serialization() {
        let json = serde_json::to_string(&PartnerRole::MaterialSupplier).unwrap();
        assert_eq!(json, "\"material_supplier\"");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Supplier@Example.COM ").unwrap(),
            "supplier@example.com"
        );
        assert!(normalize_email("").is_err());
        assert!(normalize_email("no-at-sign.example.com").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("a@localhost").is_err());
        assert!(normalize_email("a@b@example.com").is_err());
        assert!(normalize_email("a b@example.com").is_err());
        assert!(normalize_email("a@example..com").is_err());
    }

    #[test]
    fn test_contact_normalized_drops_blank_fields() {
        let contact = Contact {
            email: "Ops@Acme.io".to_string(),
            name: Some("  ".to_string()),
            company: Some(" Acme ".to_string()),
            message: None,
        }
        .normalized()
        .unwrap();

        assert_eq!(contact.email, "ops@acme.io");
        assert_eq!(contact.name, None);
        assert_eq!(contact.company.as_deref(), Some("Acme"));
    }
}
