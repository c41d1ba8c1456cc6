//! Backend-neutral mid-level IR (MIR) for Osprey.
//!
//! Functions are lists of basic blocks in SSA form. Every value is defined
//! exactly once; parameter `i` of a function is value `%i`. Phi nodes lead
//! their block. Declared types appear as named sums and records whose shapes
//! live in the module's [`MirLayoutCatalog`].

pub mod builder;
mod display;
pub mod interp;
pub mod layout;
pub mod verify;

use serde::Serialize;

pub use builder::MirFunctionBuilder;
pub use interp::{Interpreter, InterpError, Value};
pub use layout::{LayoutError, TypeLayout, plan_layout_catalog, validate_layout_catalog};
pub use verify::{VerifyError, verify_module};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MirValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MirBlockId(pub u32);

/// Runtime representation of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum MirType {
    Int,
    Bool,
    String,
    Unit,
    /// Enum or tagged union, by declared name.
    Sum(String),
    Record(String),
    /// A function value (pointer to a top-level or lifted function).
    Function,
    /// Uniform word for values whose type is not statically fixed.
    Any,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MirModule {
    pub functions: Vec<MirFunction>,
    pub externals: Vec<MirExternal>,
    pub layouts: MirLayoutCatalog,
}

impl MirModule {
    pub fn function(&self, name: &str) -> Option<&MirFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn external(&self, name: &str) -> Option<&MirExternal> {
        self.externals.iter().find(|e| e.name == name)
    }

    /// Declare an external function once; later declarations are ignored.
    pub fn declare_external(&mut self, name: &str, params: Vec<MirType>, ret: MirType) {
        if self.external(name).is_none() {
            self.externals.push(MirExternal {
                name: name.to_string(),
                params,
                ret,
            });
        }
    }
}

/// A runtime function implemented outside the module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirExternal {
    pub name: String,
    pub params: Vec<MirType>,
    pub ret: MirType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirFunction {
    pub name: String,
    pub signature: MirFunctionSignature,
    pub entry: MirBlockId,
    pub blocks: Vec<MirBlock>,
    /// Type of every value, indexed by value id.
    pub value_types: Vec<MirType>,
}

impl MirFunction {
    pub fn block(&self, id: MirBlockId) -> Option<&MirBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn value_type(&self, value: MirValueId) -> Option<&MirType> {
        self.value_types.get(value.0 as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirFunctionSignature {
    pub params: Vec<MirType>,
    pub ret: MirType,
    /// Effects the source function declared; empty for pure functions.
    pub effects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirBlock {
    pub id: MirBlockId,
    pub instructions: Vec<MirInst>,
    pub terminator: MirTerminator,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MirInst {
    Const {
        dest: MirValueId,
        literal: MirLiteral,
    },
    Binary {
        dest: MirValueId,
        op: MirBinaryOp,
        left: MirValueId,
        right: MirValueId,
    },
    Unary {
        dest: MirValueId,
        op: MirUnaryOp,
        operand: MirValueId,
    },
    Convert {
        dest: MirValueId,
        conversion: MirConversion,
        value: MirValueId,
    },
    Call {
        dest: MirValueId,
        callee: MirCallee,
        args: Vec<MirValueId>,
        ret: MirType,
    },
    FunctionRef {
        dest: MirValueId,
        function: String,
    },
    RecordInit {
        dest: MirValueId,
        record_type: String,
        fields: Vec<MirValueId>,
    },
    RecordFieldLoad {
        dest: MirValueId,
        record: MirValueId,
        record_type: String,
        field_index: usize,
        field_ty: MirType,
    },
    SumInit {
        dest: MirValueId,
        sum_type: String,
        variant: String,
        tag: u32,
        fields: Vec<MirValueId>,
    },
    SumTagLoad {
        dest: MirValueId,
        sum: MirValueId,
        sum_type: String,
    },
    SumPayloadLoad {
        dest: MirValueId,
        sum: MirValueId,
        sum_type: String,
        variant: String,
        field_index: usize,
        field_ty: MirType,
    },
    Phi {
        dest: MirValueId,
        ty: MirType,
        incoming: Vec<(MirBlockId, MirValueId)>,
    },
}

impl MirInst {
    pub fn dest(&self) -> MirValueId {
        match self {
            MirInst::Const { dest, .. }
            | MirInst::Binary { dest, .. }
            | MirInst::Unary { dest, .. }
            | MirInst::Convert { dest, .. }
            | MirInst::Call { dest, .. }
            | MirInst::FunctionRef { dest, .. }
            | MirInst::RecordInit { dest, .. }
            | MirInst::RecordFieldLoad { dest, .. }
            | MirInst::SumInit { dest, .. }
            | MirInst::SumTagLoad { dest, .. }
            | MirInst::SumPayloadLoad { dest, .. }
            | MirInst::Phi { dest, .. } => *dest,
        }
    }

    /// Values read by this instruction, phi inputs included.
    pub fn operands(&self) -> Vec<MirValueId> {
        match self {
            MirInst::Const { .. } | MirInst::FunctionRef { .. } => vec![],
            MirInst::Binary { left, right, .. } => vec![*left, *right],
            MirInst::Unary { operand, .. } => vec![*operand],
            MirInst::Convert { value, .. } => vec![*value],
            MirInst::Call { callee, args, .. } => {
                let mut values = args.clone();
                if let MirCallee::Value(v) = callee {
                    values.push(*v);
                }
                values
            }
            MirInst::RecordInit { fields, .. } | MirInst::SumInit { fields, .. } => fields.clone(),
            MirInst::RecordFieldLoad { record, .. } => vec![*record],
            MirInst::SumTagLoad { sum, .. } | MirInst::SumPayloadLoad { sum, .. } => vec![*sum],
            MirInst::Phi { incoming, .. } => incoming.iter().map(|(_, v)| *v).collect(),
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, MirInst::Phi { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MirCallee {
    Local(String),
    External(String),
    Value(MirValueId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MirLiteral {
    Int(i64),
    Bool(bool),
    String(String),
    Unit,
}

impl MirLiteral {
    pub fn ty(&self) -> MirType {
        match self {
            MirLiteral::Int(_) => MirType::Int,
            MirLiteral::Bool(_) => MirType::Bool,
            MirLiteral::String(_) => MirType::String,
            MirLiteral::Unit => MirType::Unit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MirBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    /// String concatenation.
    Concat,
}

impl MirBinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            MirBinaryOp::Eq
                | MirBinaryOp::Neq
                | MirBinaryOp::Lt
                | MirBinaryOp::Lte
                | MirBinaryOp::Gt
                | MirBinaryOp::Gte
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MirUnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MirConversion {
    IntToString,
    BoolToString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MirTerminator {
    Jump {
        target: MirBlockId,
    },
    Branch {
        condition: MirValueId,
        then_block: MirBlockId,
        else_block: MirBlockId,
    },
    Return {
        value: Option<MirValueId>,
    },
    Unreachable,
}

impl MirTerminator {
    pub fn successors(&self) -> Vec<MirBlockId> {
        match self {
            MirTerminator::Jump { target } => vec![*target],
            MirTerminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            MirTerminator::Return { .. } | MirTerminator::Unreachable => vec![],
        }
    }

    pub fn operands(&self) -> Vec<MirValueId> {
        match self {
            MirTerminator::Branch { condition, .. } => vec![*condition],
            MirTerminator::Return { value: Some(v) } => vec![*v],
            _ => vec![],
        }
    }
}

// ---------------------------------------------------------------------------
// Layout catalog
// ---------------------------------------------------------------------------

/// Shapes of every declared type the module refers to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MirLayoutCatalog {
    pub records: Vec<MirRecordLayout>,
    pub sums: Vec<MirSumLayout>,
}

impl MirLayoutCatalog {
    pub fn record(&self, name: &str) -> Option<&MirRecordLayout> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn sum(&self, name: &str) -> Option<&MirSumLayout> {
        self.sums.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirFieldLayout {
    pub name: String,
    pub ty: MirType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirRecordLayout {
    pub name: String,
    pub fields: Vec<MirFieldLayout>,
}

/// An enum (every variant fieldless) or a tagged union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirSumLayout {
    pub name: String,
    pub variants: Vec<MirVariantLayout>,
}

impl MirSumLayout {
    pub fn variant(&self, name: &str) -> Option<&MirVariantLayout> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn is_enum(&self) -> bool {
        self.variants.iter().all(|v| v.fields.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirVariantLayout {
    pub name: String,
    pub tag: u32,
    pub fields: Vec<MirFieldLayout>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_operands_include_indirect_callee() {
        let inst = MirInst::Call {
            dest: MirValueId(3),
            callee: MirCallee::Value(MirValueId(0)),
            args: vec![MirValueId(1), MirValueId(2)],
            ret: MirType::Int,
        };
        assert_eq!(inst.dest(), MirValueId(3));
        assert_eq!(
            inst.operands(),
            vec![MirValueId(1), MirValueId(2), MirValueId(0)]
        );
    }

    #[test]
    fn externals_are_declared_once() {
        let mut module = MirModule::default();
        module.declare_external("print", vec![MirType::String], MirType::Unit);
        module.declare_external("print", vec![MirType::Int], MirType::Int);
        assert_eq!(module.externals.len(), 1);
        assert_eq!(module.externals[0].params, vec![MirType::String]);
    }

    #[test]
    fn module_serializes_to_json() {
        let module = MirModule {
            functions: vec![],
            externals: vec![MirExternal {
                name: "strcmp".to_string(),
                params: vec![MirType::String, MirType::String],
                ret: MirType::Int,
            }],
            layouts: MirLayoutCatalog::default(),
        };
        let json = serde_json::to_value(&module).expect("serialize");
        assert_eq!(json["externals"][0]["name"], "strcmp");
        assert_eq!(json["externals"][0]["ret"], "Int");
    }
}
