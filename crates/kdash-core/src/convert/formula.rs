//! Analog input formulas

use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};
use std::collections::BTreeMap;

use super::{ConvertError, Readings};
use crate::setup::FormulaSpec;

/// Name under which the input voltage is passed to every formula
pub const INPUT_PARAM: &str = "voltage";

/// Supply voltage of the analog inputs
const VREF: f64 = 5.0;

/// A compiled analog formula
#[derive(Debug, Clone)]
pub enum Formula {
    /// Pass-through voltage
    Voltage,
    /// Sensor resistance from a pull-up divider with resistor `r1`
    Divider,
    /// User expressions, one per output unit
    Expressions(BTreeMap<String, Node>),
}

impl Formula {
    /// Compile a setup formula, checking its parameters.
    pub fn compile(
        spec: &FormulaSpec,
        params: &BTreeMap<String, f64>,
        channel: &str,
    ) -> Result<Self, ConvertError> {
        if params.contains_key(INPUT_PARAM) {
            return Err(ConvertError::ParamCollision {
                channel: channel.to_string(),
                param: INPUT_PARAM.to_string(),
            });
        }

        match spec {
            FormulaSpec::Builtin(name) => match name.as_str() {
                "voltage" => Ok(Formula::Voltage),
                "divider" => {
                    if !params.contains_key("r1") {
                        return Err(ConvertError::MissingParam {
                            channel: channel.to_string(),
                            param: "r1".to_string(),
                        });
                    }
                    Ok(Formula::Divider)
                }
                other => Err(ConvertError::Formula {
                    channel: channel.to_string(),
                    message: format!("unknown built-in formula '{other}'"),
                }),
            },
            FormulaSpec::Expressions(exprs) => {
                if exprs.is_empty() {
                    return Err(ConvertError::Formula {
                        channel: channel.to_string(),
                        message: "no output units defined".to_string(),
                    });
                }

                let mut compiled = BTreeMap::new();
                for (unit, expr) in exprs {
                    let node = build_operator_tree(expr).map_err(|e| ConvertError::Formula {
                        channel: channel.to_string(),
                        message: format!("{unit}: {e}"),
                    })?;

                    if let Some(unknown) = node
                        .iter_variable_identifiers()
                        .find(|id| *id != INPUT_PARAM && !params.contains_key(*id))
                    {
                        return Err(ConvertError::Formula {
                            channel: channel.to_string(),
                            message: format!("{unit}: unknown identifier '{unknown}'"),
                        });
                    }
                    compiled.insert(unit.clone(), node);
                }
                Ok(Formula::Expressions(compiled))
            }
        }
    }

    /// Units this formula produces
    pub fn units(&self) -> Vec<String> {
        match self {
            Formula::Voltage => vec!["volts".to_string()],
            Formula::Divider => vec!["ohms".to_string()],
            Formula::Expressions(exprs) => exprs.keys().cloned().collect(),
        }
    }

    /// Evaluate the formula for an input voltage
    pub fn evaluate(
        &self,
        voltage: f64,
        params: &BTreeMap<String, f64>,
        channel: &str,
    ) -> Result<Readings, ConvertError> {
        let mut readings = Readings::new();
        match self {
            Formula::Voltage => {
                readings.insert("volts".to_string(), voltage);
            }
            Formula::Divider => {
                let r1 = params.get("r1").copied().unwrap_or_default();
                if voltage >= VREF {
                    return Err(ConvertError::Evaluation {
                        channel: channel.to_string(),
                        message: "input at supply voltage, sensor open".to_string(),
                    });
                }
                readings.insert("ohms".to_string(), r1 * voltage / (VREF - voltage));
            }
            Formula::Expressions(exprs) => {
                let eval_err = |e: evalexpr::EvalexprError| ConvertError::Evaluation {
                    channel: channel.to_string(),
                    message: e.to_string(),
                };

                let mut ctx = HashMapContext::new();
                ctx.set_value(INPUT_PARAM.to_string(), Value::Float(voltage))
                    .map_err(eval_err)?;
                for (name, value) in params {
                    ctx.set_value(name.clone(), Value::Float(*value))
                        .map_err(eval_err)?;
                }

                for (unit, node) in exprs {
                    let value = node.eval_number_with_context(&ctx).map_err(eval_err)?;
                    readings.insert(unit.clone(), value);
                }
            }
        }
        Ok(readings)
    }
}
