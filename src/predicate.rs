use crate::{
    condition::{ConditionValue, Operator, OperatorKind},
    query::{BoundParam, ParamType, PlaceholderStyle},
};

/// Column a predicate tests, already qualified by its join alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    pub alias: &'a str,
    pub column: &'a str,
    /// Type comparison and set values are bound with.
    pub ty: ParamType,
}

impl Target<'_> {
    fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }
}

/// Parameterized WHERE fragment for one condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub fragment: String,
    pub params: Vec<BoundParam>,
}

/// Compiles one condition into a WHERE fragment. Parameters are numbered
/// consecutively from `param_seed`.
///
/// Returns `None` when the value does not fit the operator: a missing or
/// list value for comparison and pattern operators, or anything but a
/// non-empty list for `IN` / `NOT IN`. Also `None` when the parameters
/// would be numbered past `u32::MAX`.
pub fn compile(
    target: &Target<'_>,
    operator: Operator,
    value: Option<&ConditionValue>,
    param_seed: u32,
    style: PlaceholderStyle,
) -> Option<Predicate> {
    let column = target.qualified();
    let op = operator.as_sql();

    match operator.kind() {
        OperatorKind::Comparison => {
            let value = value?.as_single()?;
            param_seed.checked_add(1)?;
            Some(Predicate {
                fragment: format!("{} {} {}", column, op, style.placeholder(param_seed)),
                params: vec![BoundParam {
                    index: param_seed,
                    value: value.to_string(),
                    ty: target.ty,
                }],
            })
        }
        OperatorKind::Pattern => {
            let value = value?.as_single()?;
            param_seed.checked_add(1)?;
            Some(Predicate {
                fragment: format!("{} {} {}", column, op, style.placeholder(param_seed)),
                params: vec![BoundParam::string(param_seed, format!("%{}%", value))],
            })
        }
        OperatorKind::NullCheck => Some(Predicate {
            fragment: format!("{} {}", column, op),
            params: Vec::new(),
        }),
        OperatorKind::Set => {
            let values = value?.as_list()?;
            if values.is_empty() {
                return None;
            }
            param_seed.checked_add(u32::try_from(values.len()).ok()?)?;

            let params: Vec<BoundParam> = values
                .iter()
                .zip(param_seed..)
                .map(|(value, index)| BoundParam {
                    index,
                    value: value.clone(),
                    ty: target.ty,
                })
                .collect();
            let placeholders = params
                .iter()
                .map(|p| style.placeholder(p.index))
                .collect::<Vec<_>>()
                .join(", ");

            Some(Predicate {
                fragment: format!("{} {} ({})", column, op, placeholders),
                params,
            })
        }
    }
}
