//! Built-in table requirements of the ETL platforms.

use super::rules::BusinessRule;
use serde::Serialize;

/// Columns, types and rules a platform table must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableRequirement {
    pub platform: &'static str,
    pub table: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    /// `(column, expected type)` pairs
    pub column_types: &'static [(&'static str, &'static str)],
    pub rules: &'static [BusinessRule],
}

impl TableRequirement {
    /// `platform.table`
    pub fn key(&self) -> String {
        format!("{}.{}", self.platform, self.table)
    }

    pub fn is_known_column(&self, column: &str) -> bool {
        self.required.contains(&column) || self.optional.contains(&column)
    }
}

const TIMESTAMPTZ: &str = "timestamp with time zone";

pub static REQUIREMENTS: &[TableRequirement] = &[
    TableRequirement {
        platform: "steam",
        table: "l0_steam_raw",
        required: &[
            "id",
            "source_name",
            "report_type",
            "report_period",
            "batch_id",
            "payload",
            "created_at",
            "loaded_at",
        ],
        optional: &["file_name", "file_path", "content", "metadata", "extraction_date"],
        column_types: &[
            ("id", "bigint"),
            ("source_name", "text"),
            ("report_type", "text"),
            ("report_period", "date"),
            ("batch_id", "text"),
            ("payload", "jsonb"),
            ("created_at", TIMESTAMPTZ),
            ("loaded_at", TIMESTAMPTZ),
        ],
        rules: &[
            BusinessRule::JsonPayload {
                column: "payload",
                fields: &["country", "sku", "platform"],
            },
            BusinessRule::ValuePattern {
                column: "batch_id",
                pattern: "steam_batch_*",
            },
            BusinessRule::ExpectedValue {
                column: "source_name",
                value: "steam_api",
            },
        ],
    },
    TableRequirement {
        platform: "steam",
        table: "l1_steam_sales_country",
        required: &[
            "report_period",
            "country",
            "sku",
            "platform",
            "net_units",
            "net_usd",
            "legal_entity",
        ],
        optional: &["currency", "loaded_at"],
        column_types: &[
            ("report_period", "date"),
            ("country", "text"),
            ("sku", "text"),
            ("platform", "text"),
            ("net_units", "bigint"),
            ("net_usd", "numeric"),
            ("legal_entity", "text"),
        ],
        rules: &[],
    },
    TableRequirement {
        platform: "steam",
        table: "l1_steam_revenue_share_country",
        required: &[
            "report_period",
            "country",
            "sku",
            "platform",
            "revenue_share_usd",
            "legal_entity",
        ],
        optional: &[],
        column_types: &[("revenue_share_usd", "numeric")],
        rules: &[],
    },
    TableRequirement {
        platform: "steam",
        table: "steam_highwatermark",
        required: &["source_name", "watermark_date", "grace_days", "updated_at"],
        optional: &["notes"],
        column_types: &[
            ("source_name", "text"),
            ("watermark_date", "date"),
            ("grace_days", "smallint"),
            ("updated_at", TIMESTAMPTZ),
        ],
        rules: &[],
    },
    TableRequirement {
        platform: "sony",
        table: "l0_sony_raw",
        required: &[
            "id",
            "source_name",
            "batch_id",
            "extraction_date",
            "payload",
            "created_at",
        ],
        optional: &[
            "file_name",
            "file_path",
            "record_hash",
            "content",
            "report_type",
            "report_period",
            "legal_entity",
            "loaded_at",
        ],
        column_types: &[
            ("id", "bigint"),
            ("source_name", "text"),
            ("batch_id", "text"),
            ("extraction_date", "date"),
            ("payload", "jsonb"),
            ("created_at", TIMESTAMPTZ),
        ],
        rules: &[
            BusinessRule::JsonPayload {
                column: "payload",
                fields: &["product_sku", "country_code"],
            },
            BusinessRule::ValuePattern {
                column: "batch_id",
                pattern: "sony_batch_*",
            },
            BusinessRule::ExpectedValue {
                column: "source_name",
                value: "sony_domo",
            },
        ],
    },
    TableRequirement {
        platform: "sony",
        table: "l1_sony_financials",
        required: &[
            "id",
            "batch_id",
            "transaction_date",
            "product_id",
            "gross_revenue_usd",
        ],
        optional: &[
            "extraction_date",
            "event_date",
            "product_name",
            "country_code",
            "country_name",
            "legal_entity",
            "net_revenue_usd",
            "currency",
            "units_sold",
            "created_at",
            "processed_at",
        ],
        column_types: &[("gross_revenue_usd", "numeric"), ("transaction_date", "date")],
        rules: &[],
    },
];

/// Looks up the requirement registered for `platform.table`.
pub fn requirement(platform: &str, table: &str) -> Option<&'static TableRequirement> {
    REQUIREMENTS
        .iter()
        .find(|r| r.platform == platform && r.table == table)
}

/// Requirements of one platform, in registry order.
pub fn tables_for(platform: &str) -> impl Iterator<Item = &'static TableRequirement> + '_ {
    REQUIREMENTS.iter().filter(move |r| r.platform == platform)
}

/// Distinct platforms, in registry order.
pub fn platforms() -> Vec<&'static str> {
    let mut platforms: Vec<&'static str> = Vec::new();
    for requirement in REQUIREMENTS {
        if !platforms.contains(&requirement.platform) {
            platforms.push(requirement.platform);
        }
    }
    platforms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platforms() {
        assert_eq!(platforms(), vec!["steam", "sony"]);
        assert_eq!(tables_for("steam").count(), 4);
        assert_eq!(tables_for("sony").count(), 2);
        assert_eq!(tables_for("epic").count(), 0);
    }

    #[test]
    fn test_lookup_and_key() {
        let requirement = requirement("steam", "l0_steam_raw").unwrap();
        assert_eq!(requirement.key(), "steam.l0_steam_raw");
        assert!(requirement.is_known_column("metadata"));
        assert!(!requirement.is_known_column("extra"));
        assert!(super::requirement("sony", "l0_steam_raw").is_none());
    }

    #[test]
    fn test_typed_columns_are_declared() {
        for requirement in REQUIREMENTS {
            assert_eq!(
                requirement.required.len() + requirement.optional.len(),
                requirement
                    .required
                    .iter()
                    .chain(requirement.optional)
                    .collect::<std::collections::BTreeSet<_>>()
                    .len(),
                "duplicate column in {}",
                requirement.key()
            );
            for (column, _) in requirement.column_types {
                assert!(
                    requirement.is_known_column(column),
                    "{} types undeclared column {}",
                    requirement.key(),
                    column
                );
            }
        }
    }
}
