//! Textual dump of MIR, used by snapshot tests and `--trace` output.

use std::fmt;

use crate::{
    MirBinaryOp, MirCallee, MirConversion, MirFunction, MirInst, MirLiteral, MirModule,
    MirTerminator, MirType, MirUnaryOp, MirValueId,
};

impl fmt::Display for MirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirType::Int => write!(f, "Int"),
            MirType::Bool => write!(f, "Bool"),
            MirType::String => write!(f, "String"),
            MirType::Unit => write!(f, "Unit"),
            MirType::Sum(name) | MirType::Record(name) => write!(f, "{name}"),
            MirType::Function => write!(f, "Fn"),
            MirType::Any => write!(f, "Any"),
        }
    }
}

impl fmt::Display for MirValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for crate::MirBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

fn binary_mnemonic(op: MirBinaryOp) -> &'static str {
    match op {
        MirBinaryOp::Add => "add",
        MirBinaryOp::Sub => "sub",
        MirBinaryOp::Mul => "mul",
        MirBinaryOp::Div => "div",
        MirBinaryOp::Mod => "mod",
        MirBinaryOp::Eq => "eq",
        MirBinaryOp::Neq => "ne",
        MirBinaryOp::Lt => "lt",
        MirBinaryOp::Lte => "le",
        MirBinaryOp::Gt => "gt",
        MirBinaryOp::Gte => "ge",
        MirBinaryOp::And => "and",
        MirBinaryOp::Or => "or",
        MirBinaryOp::Concat => "concat",
    }
}

fn join(values: &[MirValueId]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_types(types: &[MirType]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for MirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.dest())?;
        match self {
            MirInst::Const { literal, .. } => match literal {
                MirLiteral::Int(n) => write!(f, "const {n}"),
                MirLiteral::Bool(b) => write!(f, "const {b}"),
                MirLiteral::String(s) => write!(f, "const {s:?}"),
                MirLiteral::Unit => write!(f, "const ()"),
            },
            MirInst::Binary {
                op, left, right, ..
            } => write!(f, "{} {left}, {right}", binary_mnemonic(*op)),
            MirInst::Unary { op, operand, .. } => match op {
                MirUnaryOp::Neg => write!(f, "neg {operand}"),
                MirUnaryOp::Not => write!(f, "not {operand}"),
            },
            MirInst::Convert {
                conversion, value, ..
            } => match conversion {
                MirConversion::IntToString => write!(f, "int_to_string {value}"),
                MirConversion::BoolToString => write!(f, "bool_to_string {value}"),
            },
            MirInst::Call {
                callee, args, ret, ..
            } => match callee {
                MirCallee::Local(name) => write!(f, "call @{name}({}) : {ret}", join(args)),
                MirCallee::External(name) => {
                    write!(f, "call extern @{name}({}) : {ret}", join(args))
                }
                MirCallee::Value(v) => write!(f, "call {v}({}) : {ret}", join(args)),
            },
            MirInst::FunctionRef { function, .. } => write!(f, "fn_ref @{function}"),
            MirInst::RecordInit {
                record_type,
                fields,
                ..
            } => write!(f, "record_init {record_type}({})", join(fields)),
            MirInst::RecordFieldLoad {
                record,
                record_type,
                field_index,
                ..
            } => write!(f, "record_field {record}, {record_type}.{field_index}"),
            MirInst::SumInit {
                sum_type,
                variant,
                tag,
                fields,
                ..
            } => write!(f, "sum_init {sum_type}.{variant}#{tag}({})", join(fields)),
            MirInst::SumTagLoad { sum, sum_type, .. } => write!(f, "sum_tag {sum} : {sum_type}"),
            MirInst::SumPayloadLoad {
                sum,
                sum_type,
                variant,
                field_index,
                ..
            } => write!(f, "sum_payload {sum}, {sum_type}.{variant}.{field_index}"),
            MirInst::Phi { ty, incoming, .. } => {
                write!(f, "phi {ty}")?;
                for (i, (block, value)) in incoming.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}[{block}: {value}]")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for MirTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirTerminator::Jump { target } => write!(f, "jump {target}"),
            MirTerminator::Branch {
                condition,
                then_block,
                else_block,
            } => write!(f, "branch {condition}, {then_block}, {else_block}"),
            MirTerminator::Return { value: Some(v) } => write!(f, "return {v}"),
            MirTerminator::Return { value: None } => write!(f, "return"),
            MirTerminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for MirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, ty) in self.signature.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{i}: {ty}")?;
        }
        write!(f, ") -> {}", self.signature.ret)?;
        if !self.signature.effects.is_empty() {
            write!(f, " !{}", self.signature.effects.join(", "))?;
        }
        writeln!(f, " {{")?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for inst in &block.instructions {
                writeln!(f, "  {inst}")?;
            }
            writeln!(f, "  {}", block.terminator)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for MirModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for external in &self.externals {
            writeln!(
                f,
                "extern fn {}({}) -> {}",
                external.name,
                join_types(&external.params),
                external.ret
            )?;
        }
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 || !self.externals.is_empty() {
                writeln!(f)?;
            }
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}
