use crate::list::ListDefinitions;
use crate::value::{format_float, Value};

// ── NativeOp ────────────────────────────────────────────────────

/// The built-in operator set of the story bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Negate,
    Equal,
    NotEquals,
    Greater,
    Less,
    GreaterOrEquals,
    LessOrEquals,
    Not,
    And,
    Or,
    Min,
    Max,
    Pow,
    Floor,
    Ceiling,
    IntCast,
    FloatCast,
    Has,
    HasNot,
    Intersect,
    ListMin,
    ListMax,
    ListAll,
    ListCount,
    ListValueOf,
    ListInvert,
}

impl NativeOp {
    pub fn arity(self) -> usize {
        use NativeOp::*;
        match self {
            Negate | Not | Floor | Ceiling | IntCast | FloatCast | ListMin | ListMax
            | ListAll | ListCount | ListValueOf | ListInvert => 1,
            _ => 2,
        }
    }

    pub fn wire_name(self) -> &'static str {
        use NativeOp::*;
        match self {
            Add => "+",
            Subtract => "-",
            Multiply => "*",
            Divide => "/",
            Mod => "%",
            Negate => "_",
            Equal => "==",
            NotEquals => "!=",
            Greater => ">",
            Less => "<",
            GreaterOrEquals => ">=",
            LessOrEquals => "<=",
            Not => "!",
            And => "&&",
            Or => "||",
            Min => "MIN",
            Max => "MAX",
            Pow => "POW",
            Floor => "FLOOR",
            Ceiling => "CEILING",
            IntCast => "INT",
            FloatCast => "FLOAT",
            Has => "?",
            HasNot => "!?",
            Intersect => "L^",
            ListMin => "LIST_MIN",
            ListMax => "LIST_MAX",
            ListAll => "LIST_ALL",
            ListCount => "LIST_COUNT",
            ListValueOf => "LIST_VALUE",
            ListInvert => "LIST_INVERT",
        }
    }

    pub fn from_wire_name(s: &str) -> Option<NativeOp> {
        use NativeOp::*;
        Some(match s {
            "+" => Add,
            "-" => Subtract,
            "*" => Multiply,
            "/" => Divide,
            "%" => Mod,
            "_" => Negate,
            "==" => Equal,
            "!=" => NotEquals,
            ">" => Greater,
            "<" => Less,
            ">=" => GreaterOrEquals,
            "<=" => LessOrEquals,
            "!" => Not,
            "&&" => And,
            "||" => Or,
            "MIN" => Min,
            "MAX" => Max,
            "POW" => Pow,
            "FLOOR" => Floor,
            "CEILING" => Ceiling,
            "INT" => IntCast,
            "FLOAT" => FloatCast,
            "?" => Has,
            "!?" => HasNot,
            "L^" => Intersect,
            "LIST_MIN" => ListMin,
            "LIST_MAX" => ListMax,
            "LIST_ALL" => ListAll,
            "LIST_COUNT" => ListCount,
            "LIST_VALUE" => ListValueOf,
            "LIST_INVERT" => ListInvert,
            _ => return None,
        })
    }
}

// ── Coercion ────────────────────────────────────────────────────

/// Coercion ladder position. Binary operands are both cast to the
/// higher of the two before dispatch; bools ride as integers.
fn ladder(v: &Value) -> Result<u8, String> {
    match v {
        Value::Bool(_) => Ok(0),
        Value::Int(_) => Ok(1),
        Value::Float(_) => Ok(2),
        Value::List(_) => Ok(3),
        Value::Str(_) => Ok(4),
        Value::DivertTarget(_) => Ok(5),
        Value::VariablePointer { .. } => Ok(6),
        Value::Void => Err("cannot perform operation on void".into()),
    }
}

fn cast_to(v: Value, rung: u8) -> Result<Value, String> {
    let from = ladder(&v)?;
    if from == rung {
        return Ok(v);
    }
    match (v, rung) {
        (Value::Bool(b), 1) => Ok(Value::Int(b as i64)),
        (Value::Bool(b), 2) => Ok(Value::Float(b as i64 as f64)),
        (Value::Bool(b), 4) => Ok(Value::Str(
            if b { "true" } else { "false" }.to_string(),
        )),
        (Value::Int(i), 2) => Ok(Value::Float(i as f64)),
        (Value::Int(i), 4) => Ok(Value::Str(i.to_string())),
        (Value::Float(f), 4) => Ok(Value::Str(format_float(f))),
        (v, _) => Err(format!(
            "cannot coerce {} for native operation",
            v.type_name()
        )),
    }
}

fn bool_int(b: bool) -> Value {
    Value::Int(b as i64)
}

// ── Evaluation ──────────────────────────────────────────────────

/// Evaluate a native operator over already-popped arguments (in
/// evaluation order: `args[0]` is the left operand).
///
/// Comparison and logical operators yield 0/1 integers.
pub fn evaluate(op: NativeOp, args: Vec<Value>, defs: &ListDefinitions) -> Result<Value, String> {
    if args.len() != op.arity() {
        return Err(format!(
            "native operation {} expected {} arguments, got {}",
            op.wire_name(),
            op.arity(),
            args.len()
        ));
    }
    match op.arity() {
        1 => evaluate_unary(op, args.into_iter().next().unwrap(), defs),
        _ => {
            let mut it = args.into_iter();
            let lhs = it.next().unwrap();
            let rhs = it.next().unwrap();
            evaluate_binary(op, lhs, rhs, defs)
        }
    }
}

fn evaluate_unary(op: NativeOp, v: Value, defs: &ListDefinitions) -> Result<Value, String> {
    use NativeOp::*;
    match (op, v) {
        (Negate, Value::Int(i)) => Ok(Value::Int(-i)),
        (Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (Negate, Value::Bool(b)) => Ok(Value::Int(-(b as i64))),

        (Not, v) => Ok(bool_int(!v.is_truthy()?)),

        (Floor, Value::Int(i)) => Ok(Value::Int(i)),
        (Floor, Value::Float(f)) => Ok(Value::Float(f.floor())),
        (Ceiling, Value::Int(i)) => Ok(Value::Int(i)),
        (Ceiling, Value::Float(f)) => Ok(Value::Float(f.ceil())),

        (IntCast, Value::Int(i)) => Ok(Value::Int(i)),
        (IntCast, Value::Float(f)) => Ok(Value::Int(f.trunc() as i64)),
        (IntCast, Value::Bool(b)) => Ok(Value::Int(b as i64)),
        (FloatCast, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (FloatCast, Value::Float(f)) => Ok(Value::Float(f)),
        (FloatCast, Value::Bool(b)) => Ok(Value::Float(b as i64 as f64)),

        (ListMin, Value::List(l)) => Ok(Value::List(match l.min_entry() {
            Some((item, value)) => crate::list::ListValue::single(item.clone(), value),
            None => l.inheriting_empty(),
        })),
        (ListMax, Value::List(l)) => Ok(Value::List(match l.max_entry() {
            Some((item, value)) => crate::list::ListValue::single(item.clone(), value),
            None => l.inheriting_empty(),
        })),
        (ListAll, Value::List(l)) => Ok(Value::List(l.all_from_origins(defs))),
        (ListCount, Value::List(l)) => Ok(Value::Int(l.len() as i64)),
        (ListValueOf, Value::List(l)) => {
            Ok(Value::Int(l.max_entry().map(|e| e.1).unwrap_or(0)))
        }
        (ListInvert, Value::List(l)) => Ok(Value::List(l.inverse(defs))),

        (op, v) => Err(format!(
            "cannot perform {} on {}",
            op.wire_name(),
            v.type_name()
        )),
    }
}

fn evaluate_binary(
    op: NativeOp,
    lhs: Value,
    rhs: Value,
    defs: &ListDefinitions,
) -> Result<Value, String> {
    use NativeOp::*;

    // List/scalar combinations have their own rules, before coercion.
    let lhs_is_list = matches!(lhs, Value::List(_));
    let rhs_is_list = matches!(rhs, Value::List(_));
    if lhs_is_list || rhs_is_list {
        if !(lhs_is_list && rhs_is_list) {
            return match (op, lhs, rhs) {
                // Shift a list's items through their origin definition.
                (Add, Value::List(l), rhs) => {
                    let n = rhs.as_int().ok_or_else(|| {
                        format!("cannot add {} to a list", rhs.type_name())
                    })?;
                    Ok(Value::List(l.shifted_by(n, defs)))
                }
                (Subtract, Value::List(l), rhs) => {
                    let n = rhs.as_int().ok_or_else(|| {
                        format!("cannot subtract {} from a list", rhs.type_name())
                    })?;
                    Ok(Value::List(l.shifted_by(-n, defs)))
                }
                // Logical ops degrade to truthiness.
                (And, lhs, rhs) => Ok(bool_int(lhs.is_truthy()? && rhs.is_truthy()?)),
                (Or, lhs, rhs) => Ok(bool_int(lhs.is_truthy()? || rhs.is_truthy()?)),
                (op, lhs, rhs) => Err(format!(
                    "cannot perform {} on {} and {}",
                    op.wire_name(),
                    lhs.type_name(),
                    rhs.type_name()
                )),
            };
        }
        let (Value::List(a), Value::List(b)) = (lhs, rhs) else {
            unreachable!()
        };
        return match op {
            Add => Ok(Value::List(a.union(&b))),
            Subtract => Ok(Value::List(a.without(&b))),
            Intersect => Ok(Value::List(a.intersect(&b))),
            Has => Ok(bool_int(a.contains(&b))),
            HasNot => Ok(bool_int(!a.contains(&b))),
            Equal => Ok(bool_int(a == b)),
            NotEquals => Ok(bool_int(a != b)),
            Greater => Ok(bool_int(a.greater_than(&b))),
            Less => Ok(bool_int(a.less_than(&b))),
            GreaterOrEquals => Ok(bool_int(a.greater_than_or_equals(&b))),
            LessOrEquals => Ok(bool_int(a.less_than_or_equals(&b))),
            And => Ok(bool_int(!a.is_empty() && !b.is_empty())),
            Or => Ok(bool_int(!a.is_empty() || !b.is_empty())),
            _ => Err(format!("cannot perform {} on lists", op.wire_name())),
        };
    }

    let rung = ladder(&lhs)?.max(ladder(&rhs)?);
    let lhs = cast_to(lhs, rung)?;
    let rhs = cast_to(rhs, rung)?;

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_binary(op, a, b),
        (Value::Bool(a), Value::Bool(b)) => int_binary(op, a as i64, b as i64),
        (Value::Float(a), Value::Float(b)) => float_binary(op, a, b),
        (Value::Str(a), Value::Str(b)) => string_binary(op, a, b),
        (Value::DivertTarget(a), Value::DivertTarget(b)) => match op {
            Equal => Ok(bool_int(a == b)),
            NotEquals => Ok(bool_int(a != b)),
            _ => Err(format!(
                "cannot perform {} on divert targets",
                op.wire_name()
            )),
        },
        (lhs, rhs) => Err(format!(
            "cannot perform {} on {} and {}",
            op.wire_name(),
            lhs.type_name(),
            rhs.type_name()
        )),
    }
}

fn int_binary(op: NativeOp, a: i64, b: i64) -> Result<Value, String> {
    use NativeOp::*;
    Ok(match op {
        Add => Value::Int(a.wrapping_add(b)),
        Subtract => Value::Int(a.wrapping_sub(b)),
        Multiply => Value::Int(a.wrapping_mul(b)),
        Divide => {
            if b == 0 {
                return Err("divide by zero".into());
            }
            Value::Int(a / b)
        }
        Mod => {
            if b == 0 {
                return Err("modulo by zero".into());
            }
            Value::Int(a % b)
        }
        Equal => bool_int(a == b),
        NotEquals => bool_int(a != b),
        Greater => bool_int(a > b),
        Less => bool_int(a < b),
        GreaterOrEquals => bool_int(a >= b),
        LessOrEquals => bool_int(a <= b),
        And => bool_int(a != 0 && b != 0),
        Or => bool_int(a != 0 || b != 0),
        Min => Value::Int(a.min(b)),
        Max => Value::Int(a.max(b)),
        Pow => Value::Float((a as f64).powf(b as f64)),
        _ => {
            return Err(format!("cannot perform {} on ints", op.wire_name()));
        }
    })
}

fn float_binary(op: NativeOp, a: f64, b: f64) -> Result<Value, String> {
    use NativeOp::*;
    Ok(match op {
        Add => Value::Float(a + b),
        Subtract => Value::Float(a - b),
        Multiply => Value::Float(a * b),
        Divide => {
            if b == 0.0 {
                return Err("divide by zero".into());
            }
            Value::Float(a / b)
        }
        Mod => {
            if b == 0.0 {
                return Err("modulo by zero".into());
            }
            Value::Float(a % b)
        }
        Equal => bool_int(a == b),
        NotEquals => bool_int(a != b),
        Greater => bool_int(a > b),
        Less => bool_int(a < b),
        GreaterOrEquals => bool_int(a >= b),
        LessOrEquals => bool_int(a <= b),
        And => bool_int(a != 0.0 && b != 0.0),
        Or => bool_int(a != 0.0 || b != 0.0),
        Min => Value::Float(a.min(b)),
        Max => Value::Float(a.max(b)),
        Pow => Value::Float(a.powf(b)),
        _ => {
            return Err(format!("cannot perform {} on floats", op.wire_name()));
        }
    })
}

fn string_binary(op: NativeOp, a: String, b: String) -> Result<Value, String> {
    use NativeOp::*;
    Ok(match op {
        Add => Value::Str(a + &b),
        Equal => bool_int(a == b),
        NotEquals => bool_int(a != b),
        Has => bool_int(a.contains(&b)),
        HasNot => bool_int(!a.contains(&b)),
        _ => {
            return Err(format!("cannot perform {} on strings", op.wire_name()));
        }
    })
}
