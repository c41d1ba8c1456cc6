//! Reference interpreter for MIR.
//!
//! Executes a module directly, with sums and records as tagged values, so
//! compiled programs can be run without a native backend. Payload reads are
//! checked against the live tag.

use std::fmt;
use std::rc::Rc;

use log::trace;

use crate::{
    MirBinaryOp, MirBlockId, MirCallee, MirConversion, MirFunction, MirInst, MirLiteral, MirModule,
    MirTerminator, MirUnaryOp, MirValueId,
};

const MAX_CALL_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(Rc<str>),
    Unit,
    Sum {
        type_name: Rc<str>,
        tag: u32,
        fields: Rc<[Value]>,
    },
    Record {
        type_name: Rc<str>,
        fields: Rc<[Value]>,
    },
    Function(Rc<str>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::String(_) => "String",
            Value::Unit => "Unit",
            Value::Sum { .. } => "sum",
            Value::Record { .. } => "record",
            Value::Function(_) => "function",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Unit => write!(f, "()"),
            Value::Sum {
                type_name,
                tag,
                fields,
            } => {
                write!(f, "{type_name}#{tag}")?;
                if !fields.is_empty() {
                    write!(f, "(")?;
                    for (i, v) in fields.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            Value::Record { type_name, fields } => {
                write!(f, "{type_name} {{")?;
                for (i, v) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {v}")?;
                }
                write!(f, " }}")
            }
            Value::Function(name) => write!(f, "<fn {name}>"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum InterpError {
    #[error("unknown function `{function}`")]
    UnknownFunction { function: String },
    #[error("unknown external `{function}`")]
    UnknownExternal { function: String },
    #[error("`{function}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("value `%{value}` read before it was defined in `{function}`")]
    UndefinedValue { function: String, value: u32 },
    #[error("block bb{block} not found in `{function}`")]
    UnknownBlock { function: String, block: u32 },
    #[error("phi `%{value}` in `{function}` has no input for bb{pred}")]
    MissingPhiInput {
        function: String,
        value: u32,
        pred: u32,
    },
    #[error("type error in `{function}`: {detail}")]
    TypeError { function: String, detail: String },
    #[error("division by zero in `{function}`")]
    DivisionByZero { function: String },
    #[error(
        "payload read of `{sum_type}.{variant}` in `{function}` but the value holds tag {actual_tag}"
    )]
    TagMismatch {
        function: String,
        sum_type: String,
        variant: String,
        actual_tag: u32,
    },
    #[error("field {index} out of bounds for `{type_name}` in `{function}`")]
    FieldOutOfBounds {
        function: String,
        type_name: String,
        index: usize,
    },
    #[error("reached unreachable code in `{function}`")]
    Unreachable { function: String },
    #[error("call depth exceeded {limit}")]
    StackOverflow { limit: usize },
}

/// Executes functions of one module. Lines written by `print` are collected
/// in [`Interpreter::output`].
#[derive(Debug)]
pub struct Interpreter<'m> {
    module: &'m MirModule,
    output: Vec<String>,
    depth: usize,
}

struct Frame<'f> {
    function: &'f MirFunction,
    values: Vec<Option<Value>>,
}

impl Frame<'_> {
    fn get(&self, value: MirValueId) -> Result<Value, InterpError> {
        self.values
            .get(value.0 as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| InterpError::UndefinedValue {
                function: self.function.name.clone(),
                value: value.0,
            })
    }

    fn set(&mut self, value: MirValueId, v: Value) {
        let index = value.0 as usize;
        if index >= self.values.len() {
            self.values.resize(index + 1, None);
        }
        self.values[index] = Some(v);
    }

    fn type_error(&self, detail: impl Into<String>) -> InterpError {
        InterpError::TypeError {
            function: self.function.name.clone(),
            detail: detail.into(),
        }
    }

    fn int(&self, value: MirValueId) -> Result<i64, InterpError> {
        match self.get(value)? {
            Value::Int(n) => Ok(n),
            other => Err(self.type_error(format!("expected Int, found {}", other.kind()))),
        }
    }

    fn bool(&self, value: MirValueId) -> Result<bool, InterpError> {
        match self.get(value)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.type_error(format!("expected Bool, found {}", other.kind()))),
        }
    }
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m MirModule) -> Self {
        Self {
            module,
            output: Vec::new(),
            depth: 0,
        }
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, InterpError> {
        let function = self
            .module
            .function(name)
            .ok_or_else(|| InterpError::UnknownFunction {
                function: name.to_string(),
            })?;
        if function.signature.params.len() != args.len() {
            return Err(InterpError::ArityMismatch {
                function: name.to_string(),
                expected: function.signature.params.len(),
                found: args.len(),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(InterpError::StackOverflow {
                limit: MAX_CALL_DEPTH,
            });
        }
        trace!("call {name}({} args)", args.len());
        self.depth += 1;
        let result = self.run(function, args);
        self.depth -= 1;
        result
    }

    fn run(&mut self, function: &'m MirFunction, args: Vec<Value>) -> Result<Value, InterpError> {
        let mut frame = Frame {
            function,
            values: vec![None; function.value_types.len()],
        };
        for (i, arg) in args.into_iter().enumerate() {
            frame.set(MirValueId(i as u32), arg);
        }

        let mut prev: Option<MirBlockId> = None;
        let mut current = function.entry;
        loop {
            let block = function
                .block(current)
                .ok_or_else(|| InterpError::UnknownBlock {
                    function: function.name.clone(),
                    block: current.0,
                })?;
            for inst in &block.instructions {
                let value = self.exec(&frame, inst, prev)?;
                frame.set(inst.dest(), value);
            }
            match &block.terminator {
                MirTerminator::Jump { target } => {
                    prev = Some(current);
                    current = *target;
                }
                MirTerminator::Branch {
                    condition,
                    then_block,
                    else_block,
                } => {
                    prev = Some(current);
                    current = if frame.bool(*condition)? {
                        *then_block
                    } else {
                        *else_block
                    };
                }
                MirTerminator::Return { value } => {
                    return match value {
                        Some(v) => frame.get(*v),
                        None => Ok(Value::Unit),
                    };
                }
                MirTerminator::Unreachable => {
                    return Err(InterpError::Unreachable {
                        function: function.name.clone(),
                    });
                }
            }
        }
    }

    fn exec(
        &mut self,
        frame: &Frame<'m>,
        inst: &MirInst,
        prev: Option<MirBlockId>,
    ) -> Result<Value, InterpError> {
        let fname = &frame.function.name;
        match inst {
            MirInst::Const { literal, .. } => Ok(match literal {
                MirLiteral::Int(n) => Value::Int(*n),
                MirLiteral::Bool(b) => Value::Bool(*b),
                MirLiteral::String(s) => Value::string(s),
                MirLiteral::Unit => Value::Unit,
            }),
            MirInst::Binary {
                op, left, right, ..
            } => self.binary(frame, *op, *left, *right),
            MirInst::Unary { op, operand, .. } => match op {
                MirUnaryOp::Neg => Ok(Value::Int(frame.int(*operand)?.wrapping_neg())),
                MirUnaryOp::Not => Ok(Value::Bool(!frame.bool(*operand)?)),
            },
            MirInst::Convert {
                conversion, value, ..
            } => match conversion {
                MirConversion::IntToString => Ok(Value::string(frame.int(*value)?.to_string())),
                MirConversion::BoolToString => Ok(Value::string(frame.bool(*value)?.to_string())),
            },
            MirInst::Call { callee, args, .. } => {
                let args = args
                    .iter()
                    .map(|a| frame.get(*a))
                    .collect::<Result<Vec<_>, _>>()?;
                match callee {
                    MirCallee::Local(name) => self.call(name, args),
                    MirCallee::External(name) => self.external(name, args),
                    MirCallee::Value(v) => match frame.get(*v)? {
                        Value::Function(name) => self.call(&name, args),
                        other => Err(frame.type_error(format!(
                            "cannot call a value of kind {}",
                            other.kind()
                        ))),
                    },
                }
            }
            MirInst::FunctionRef { function, .. } => Ok(Value::Function(Rc::from(function.as_str()))),
            MirInst::RecordInit {
                record_type,
                fields,
                ..
            } => Ok(Value::Record {
                type_name: Rc::from(record_type.as_str()),
                fields: fields
                    .iter()
                    .map(|f| frame.get(*f))
                    .collect::<Result<Vec<_>, _>>()?
                    .into(),
            }),
            MirInst::RecordFieldLoad {
                record,
                record_type,
                field_index,
                ..
            } => match frame.get(*record)? {
                Value::Record { fields, .. } => {
                    fields
                        .get(*field_index)
                        .cloned()
                        .ok_or_else(|| InterpError::FieldOutOfBounds {
                            function: fname.clone(),
                            type_name: record_type.clone(),
                            index: *field_index,
                        })
                }
                other => Err(frame.type_error(format!(
                    "field load from `{record_type}` on a {}",
                    other.kind()
                ))),
            },
            MirInst::SumInit {
                sum_type,
                tag,
                fields,
                ..
            } => Ok(Value::Sum {
                type_name: Rc::from(sum_type.as_str()),
                tag: *tag,
                fields: fields
                    .iter()
                    .map(|f| frame.get(*f))
                    .collect::<Result<Vec<_>, _>>()?
                    .into(),
            }),
            MirInst::SumTagLoad { sum, sum_type, .. } => match frame.get(*sum)? {
                Value::Sum { tag, .. } => Ok(Value::Int(i64::from(tag))),
                other => Err(frame.type_error(format!(
                    "tag load from `{sum_type}` on a {}",
                    other.kind()
                ))),
            },
            MirInst::SumPayloadLoad {
                sum,
                sum_type,
                variant,
                field_index,
                ..
            } => {
                let Value::Sum { tag, fields, .. } = frame.get(*sum)? else {
                    return Err(frame.type_error(format!("payload load from `{sum_type}` on a non-sum")));
                };
                let expected = self
                    .module
                    .layouts
                    .sum(sum_type)
                    .and_then(|s| s.variant(variant))
                    .map(|v| v.tag);
                if expected != Some(tag) {
                    return Err(InterpError::TagMismatch {
                        function: fname.clone(),
                        sum_type: sum_type.clone(),
                        variant: variant.clone(),
                        actual_tag: tag,
                    });
                }
                fields
                    .get(*field_index)
                    .cloned()
                    .ok_or_else(|| InterpError::FieldOutOfBounds {
                        function: fname.clone(),
                        type_name: format!("{sum_type}.{variant}"),
                        index: *field_index,
                    })
            }
            MirInst::Phi { dest, incoming, .. } => {
                let pred = prev.unwrap_or(frame.function.entry);
                let (_, value) = incoming.iter().find(|(b, _)| *b == pred).ok_or_else(|| {
                    InterpError::MissingPhiInput {
                        function: fname.clone(),
                        value: dest.0,
                        pred: pred.0,
                    }
                })?;
                frame.get(*value)
            }
        }
    }

    fn binary(
        &self,
        frame: &Frame<'m>,
        op: MirBinaryOp,
        left: MirValueId,
        right: MirValueId,
    ) -> Result<Value, InterpError> {
        let l = frame.get(left)?;
        let r = frame.get(right)?;
        let fname = &frame.function.name;
        let value = match (op, &l, &r) {
            (MirBinaryOp::Concat, Value::String(a), Value::String(b)) => {
                Value::string(format!("{a}{b}"))
            }
            (MirBinaryOp::Add, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (MirBinaryOp::Sub, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(*b)),
            (MirBinaryOp::Mul, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_mul(*b)),
            (MirBinaryOp::Div | MirBinaryOp::Mod, Value::Int(_), Value::Int(0)) => {
                return Err(InterpError::DivisionByZero {
                    function: fname.clone(),
                });
            }
            (MirBinaryOp::Div, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_div(*b)),
            (MirBinaryOp::Mod, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_rem(*b)),
            (MirBinaryOp::And, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
            (MirBinaryOp::Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
            (MirBinaryOp::Eq, a, b) => Value::Bool(a == b),
            (MirBinaryOp::Neq, a, b) => Value::Bool(a != b),
            (MirBinaryOp::Lt, Value::Int(a), Value::Int(b)) => Value::Bool(a < b),
            (MirBinaryOp::Lte, Value::Int(a), Value::Int(b)) => Value::Bool(a <= b),
            (MirBinaryOp::Gt, Value::Int(a), Value::Int(b)) => Value::Bool(a > b),
            (MirBinaryOp::Gte, Value::Int(a), Value::Int(b)) => Value::Bool(a >= b),
            _ => {
                return Err(frame.type_error(format!(
                    "{op:?} on {} and {}",
                    l.kind(),
                    r.kind()
                )));
            }
        };
        Ok(value)
    }

    fn external(&mut self, name: &str, args: Vec<Value>) -> Result<Value, InterpError> {
        let type_error = |detail: &str| InterpError::TypeError {
            function: name.to_string(),
            detail: detail.to_string(),
        };
        match name {
            "print" => match args.as_slice() {
                [Value::String(s)] => {
                    self.output.push(s.to_string());
                    Ok(Value::Unit)
                }
                _ => Err(type_error("print expects one String")),
            },
            "strcmp" => match args.as_slice() {
                [Value::String(a), Value::String(b)] => Ok(Value::Int(match a.cmp(b) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                })),
                _ => Err(type_error("strcmp expects two Strings")),
            },
            _ => Err(InterpError::UnknownExternal {
                function: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        MirFunctionBuilder, MirFunctionSignature, MirLayoutCatalog, MirSumLayout, MirType,
        MirVariantLayout, MirFieldLayout,
    };

    fn sig(params: Vec<MirType>, ret: MirType) -> MirFunctionSignature {
        MirFunctionSignature {
            params,
            ret,
            effects: vec![],
        }
    }

    fn option_layouts() -> MirLayoutCatalog {
        MirLayoutCatalog {
            records: vec![],
            sums: vec![MirSumLayout {
                name: "Opt".to_string(),
                variants: vec![
                    MirVariantLayout {
                        name: "Some".to_string(),
                        tag: 0,
                        fields: vec![MirFieldLayout {
                            name: "value".to_string(),
                            ty: MirType::Int,
                        }],
                    },
                    MirVariantLayout {
                        name: "None".to_string(),
                        tag: 1,
                        fields: vec![],
                    },
                ],
            }],
        }
    }

    /// `fn unwrap_or(o: Opt, d: Int) -> Int`
    fn unwrap_or() -> MirFunction {
        let opt = MirType::Sum("Opt".to_string());
        let mut b = MirFunctionBuilder::new("unwrap_or", sig(vec![opt, MirType::Int], MirType::Int));
        let some_bb = b.new_block();
        let none_bb = b.new_block();
        let merge = b.new_block();
        let tag = b.sum_tag_load(b.param(0), "Opt");
        let zero = b.int(0);
        let is_some = b.binary(MirBinaryOp::Eq, tag, zero);
        b.branch(is_some, some_bb, none_bb);
        b.switch_to(some_bb);
        let v = b.sum_payload_load(b.param(0), "Opt", "Some", 0, MirType::Int);
        b.jump(merge);
        b.switch_to(none_bb);
        b.jump(merge);
        b.switch_to(merge);
        let out = b.phi(MirType::Int, vec![(some_bb, v), (none_bb, b.param(1))]);
        b.ret(Some(out));
        b.finish().expect("finish")
    }

    fn some(n: i64) -> Value {
        Value::Sum {
            type_name: Rc::from("Opt"),
            tag: 0,
            fields: Rc::from(vec![Value::Int(n)]),
        }
    }

    fn none() -> Value {
        Value::Sum {
            type_name: Rc::from("Opt"),
            tag: 1,
            fields: Rc::from(Vec::new()),
        }
    }

    #[test]
    fn phi_selects_by_predecessor() {
        let module = MirModule {
            functions: vec![unwrap_or()],
            externals: vec![],
            layouts: option_layouts(),
        };
        let mut interp = Interpreter::new(&module);
        assert_eq!(
            interp.call("unwrap_or", vec![some(4), Value::Int(9)]),
            Ok(Value::Int(4))
        );
        assert_eq!(
            interp.call("unwrap_or", vec![none(), Value::Int(9)]),
            Ok(Value::Int(9))
        );
    }

    #[test]
    fn payload_reads_check_the_tag() {
        let opt = MirType::Sum("Opt".to_string());
        let mut b = MirFunctionBuilder::new("force", sig(vec![opt], MirType::Int));
        let v = b.sum_payload_load(b.param(0), "Opt", "Some", 0, MirType::Int);
        b.ret(Some(v));
        let module = MirModule {
            functions: vec![b.finish().expect("finish")],
            externals: vec![],
            layouts: option_layouts(),
        };
        let err = Interpreter::new(&module).call("force", vec![none()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "payload read of `Opt.Some` in `force` but the value holds tag 1"
        );
    }

    #[test]
    fn print_collects_output_and_strcmp_orders() {
        let mut b = MirFunctionBuilder::new("main", sig(vec![], MirType::Int));
        let a = b.constant(MirLiteral::String("apple".to_string()));
        let z = b.constant(MirLiteral::String("zebra".to_string()));
        let cat = b.binary(MirBinaryOp::Concat, a, z);
        b.call(MirCallee::External("print".to_string()), vec![cat], MirType::Unit);
        let cmp = b.call(MirCallee::External("strcmp".to_string()), vec![a, z], MirType::Int);
        b.ret(Some(cmp));
        let mut module = MirModule {
            functions: vec![b.finish().expect("finish")],
            ..MirModule::default()
        };
        module.declare_external("print", vec![MirType::String], MirType::Unit);
        module.declare_external("strcmp", vec![MirType::String, MirType::String], MirType::Int);

        let mut interp = Interpreter::new(&module);
        assert_eq!(interp.call("main", vec![]), Ok(Value::Int(-1)));
        assert_eq!(interp.output(), ["applezebra".to_string()]);
    }

    #[test]
    fn runaway_recursion_is_bounded() {
        let mut b = MirFunctionBuilder::new("spin", sig(vec![], MirType::Int));
        let r = b.call(MirCallee::Local("spin".to_string()), vec![], MirType::Int);
        b.ret(Some(r));
        let module = MirModule {
            functions: vec![b.finish().expect("finish")],
            ..MirModule::default()
        };
        assert_eq!(
            Interpreter::new(&module).call("spin", vec![]),
            Err(InterpError::StackOverflow {
                limit: MAX_CALL_DEPTH
            })
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let mut b = MirFunctionBuilder::new("div", sig(vec![MirType::Int], MirType::Int));
        let zero = b.int(0);
        let q = b.binary(MirBinaryOp::Div, b.param(0), zero);
        b.ret(Some(q));
        let module = MirModule {
            functions: vec![b.finish().expect("finish")],
            ..MirModule::default()
        };
        assert!(matches!(
            Interpreter::new(&module).call("div", vec![Value::Int(1)]),
            Err(InterpError::DivisionByZero { .. })
        ));
    }
}
