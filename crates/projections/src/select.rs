//! Column projection: one output row per source row.

use std::sync::Arc;

use tierforge_config::ColumnMap;
use tierforge_core::{Projected, ProjectionRule, Row, Schema, SchemaError};

pub struct SelectRule {
    target: Arc<str>,
    columns: Vec<ColumnMap>,
}

impl SelectRule {
    pub fn new(target: impl Into<Arc<str>>, columns: Vec<ColumnMap>) -> Self {
        Self {
            target: target.into(),
            columns,
        }
    }
}

impl ProjectionRule for SelectRule {
    fn kind(&self) -> &'static str {
        "select"
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn check_source(&self, source: &Schema) -> Result<(), SchemaError> {
        for c in &self.columns {
            source.require(c.source())?;
        }
        Ok(())
    }

    fn project(&self, row: &Row) -> Vec<Projected> {
        let mut out = Row::with_capacity(self.columns.len());
        for c in &self.columns {
            out.push(c.target(), row.value(c.source()).clone());
        }
        vec![Projected {
            table: self.target.clone(),
            row: out,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tierforge_core::{Field, FieldType, Value};

    #[test]
    fn keeps_order_and_renames() {
        let rule = SelectRule::new(
            "silver",
            vec![ColumnMap::from("id"), ColumnMap::renamed("firstName", "first")],
        );
        let row = Row::new()
            .with("firstName", "abc")
            .with("lastName", "bcd")
            .with("id", 1);

        let out = rule.project(&row);
        assert_eq!(out.len(), 1);
        assert_eq!(&*out[0].table, "silver");
        assert_eq!(
            out[0].row,
            Row::new().with("id", 1).with("first", "abc")
        );
    }

    #[test]
    fn null_passes_through() {
        let rule = SelectRule::new("silver", vec![ColumnMap::from("lastName")]);
        let out = rule.project(&Row::new().with("lastName", Value::Null));
        assert!(out[0].row.value("lastName").is_null());
    }

    #[test]
    fn unknown_source_column_is_rejected() {
        let rule = SelectRule::new("silver", vec![ColumnMap::from("nickname")]);
        let schema =
            Schema::new(vec![Field::required(1, "id", FieldType::Integer)]).unwrap();
        assert_eq!(
            rule.check_source(&schema),
            Err(SchemaError::UnknownColumn {
                name: "nickname".into()
            })
        );
    }
}
