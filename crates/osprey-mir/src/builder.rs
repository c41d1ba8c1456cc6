//! Incremental construction of a [`MirFunction`].

use crate::{
    MirBinaryOp, MirBlock, MirBlockId, MirCallee, MirConversion, MirFunction,
    MirFunctionSignature, MirInst, MirLiteral, MirTerminator, MirType, MirUnaryOp, MirValueId,
};
use crate::verify::VerifyError;

#[derive(Debug)]
struct PendingBlock {
    id: MirBlockId,
    instructions: Vec<MirInst>,
    terminator: Option<MirTerminator>,
}

/// Appends instructions to a current block. Parameters occupy the first
/// value ids; the entry block is created up front and selected.
#[derive(Debug)]
pub struct MirFunctionBuilder {
    name: String,
    signature: MirFunctionSignature,
    blocks: Vec<PendingBlock>,
    current: MirBlockId,
    value_types: Vec<MirType>,
}

impl MirFunctionBuilder {
    pub fn new(name: impl Into<String>, signature: MirFunctionSignature) -> Self {
        let value_types = signature.params.clone();
        let mut builder = Self {
            name: name.into(),
            signature,
            blocks: Vec::new(),
            current: MirBlockId(0),
            value_types,
        };
        builder.current = builder.new_block();
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param(&self, index: usize) -> MirValueId {
        MirValueId(index as u32)
    }

    pub fn value_type(&self, value: MirValueId) -> Option<&MirType> {
        self.value_types.get(value.0 as usize)
    }

    pub fn new_block(&mut self) -> MirBlockId {
        let id = MirBlockId(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            id,
            instructions: Vec::new(),
            terminator: None,
        });
        id
    }

    pub fn switch_to(&mut self, block: MirBlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> MirBlockId {
        self.current
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current.0 as usize].terminator.is_some()
    }

    fn fresh_value(&mut self, ty: MirType) -> MirValueId {
        let id = MirValueId(self.value_types.len() as u32);
        self.value_types.push(ty);
        id
    }

    fn push(&mut self, inst: MirInst) {
        self.blocks[self.current.0 as usize].instructions.push(inst);
    }

    fn terminate(&mut self, terminator: MirTerminator) {
        let block = &mut self.blocks[self.current.0 as usize];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    // -- instructions -----------------------------------------------------

    pub fn constant(&mut self, literal: MirLiteral) -> MirValueId {
        let dest = self.fresh_value(literal.ty());
        self.push(MirInst::Const { dest, literal });
        dest
    }

    pub fn int(&mut self, n: i64) -> MirValueId {
        self.constant(MirLiteral::Int(n))
    }

    pub fn unit(&mut self) -> MirValueId {
        self.constant(MirLiteral::Unit)
    }

    pub fn binary(&mut self, op: MirBinaryOp, left: MirValueId, right: MirValueId) -> MirValueId {
        let ty = match op {
            MirBinaryOp::Concat => MirType::String,
            MirBinaryOp::And | MirBinaryOp::Or => MirType::Bool,
            op if op.is_comparison() => MirType::Bool,
            _ => MirType::Int,
        };
        let dest = self.fresh_value(ty);
        self.push(MirInst::Binary {
            dest,
            op,
            left,
            right,
        });
        dest
    }

    pub fn unary(&mut self, op: MirUnaryOp, operand: MirValueId) -> MirValueId {
        let ty = match op {
            MirUnaryOp::Neg => MirType::Int,
            MirUnaryOp::Not => MirType::Bool,
        };
        let dest = self.fresh_value(ty);
        self.push(MirInst::Unary { dest, op, operand });
        dest
    }

    pub fn convert(&mut self, conversion: MirConversion, value: MirValueId) -> MirValueId {
        let dest = self.fresh_value(MirType::String);
        self.push(MirInst::Convert {
            dest,
            conversion,
            value,
        });
        dest
    }

    pub fn call(&mut self, callee: MirCallee, args: Vec<MirValueId>, ret: MirType) -> MirValueId {
        let dest = self.fresh_value(ret.clone());
        self.push(MirInst::Call {
            dest,
            callee,
            args,
            ret,
        });
        dest
    }

    pub fn function_ref(&mut self, function: impl Into<String>) -> MirValueId {
        let dest = self.fresh_value(MirType::Function);
        self.push(MirInst::FunctionRef {
            dest,
            function: function.into(),
        });
        dest
    }

    pub fn record_init(&mut self, record_type: &str, fields: Vec<MirValueId>) -> MirValueId {
        let dest = self.fresh_value(MirType::Record(record_type.to_string()));
        self.push(MirInst::RecordInit {
            dest,
            record_type: record_type.to_string(),
            fields,
        });
        dest
    }

    pub fn record_field_load(
        &mut self,
        record: MirValueId,
        record_type: &str,
        field_index: usize,
        field_ty: MirType,
    ) -> MirValueId {
        let dest = self.fresh_value(field_ty.clone());
        self.push(MirInst::RecordFieldLoad {
            dest,
            record,
            record_type: record_type.to_string(),
            field_index,
            field_ty,
        });
        dest
    }

    pub fn sum_init(
        &mut self,
        sum_type: &str,
        variant: &str,
        tag: u32,
        fields: Vec<MirValueId>,
    ) -> MirValueId {
        let dest = self.fresh_value(MirType::Sum(sum_type.to_string()));
        self.push(MirInst::SumInit {
            dest,
            sum_type: sum_type.to_string(),
            variant: variant.to_string(),
            tag,
            fields,
        });
        dest
    }

    pub fn sum_tag_load(&mut self, sum: MirValueId, sum_type: &str) -> MirValueId {
        let dest = self.fresh_value(MirType::Int);
        self.push(MirInst::SumTagLoad {
            dest,
            sum,
            sum_type: sum_type.to_string(),
        });
        dest
    }

    pub fn sum_payload_load(
        &mut self,
        sum: MirValueId,
        sum_type: &str,
        variant: &str,
        field_index: usize,
        field_ty: MirType,
    ) -> MirValueId {
        let dest = self.fresh_value(field_ty.clone());
        self.push(MirInst::SumPayloadLoad {
            dest,
            sum,
            sum_type: sum_type.to_string(),
            variant: variant.to_string(),
            field_index,
            field_ty,
        });
        dest
    }

    /// Merge values from predecessor blocks. Must be emitted before any other
    /// instruction of the current block.
    pub fn phi(&mut self, ty: MirType, incoming: Vec<(MirBlockId, MirValueId)>) -> MirValueId {
        let dest = self.fresh_value(ty.clone());
        self.push(MirInst::Phi { dest, ty, incoming });
        dest
    }

    // -- terminators ------------------------------------------------------

    pub fn jump(&mut self, target: MirBlockId) {
        self.terminate(MirTerminator::Jump { target });
    }

    pub fn branch(&mut self, condition: MirValueId, then_block: MirBlockId, else_block: MirBlockId) {
        self.terminate(MirTerminator::Branch {
            condition,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<MirValueId>) {
        self.terminate(MirTerminator::Return { value });
    }

    pub fn unreachable(&mut self) {
        self.terminate(MirTerminator::Unreachable);
    }

    /// Seal the function. Every block must have a terminator.
    pub fn finish(self) -> Result<MirFunction, VerifyError> {
        let function = self.name;
        let blocks = self
            .blocks
            .into_iter()
            .map(|b| match b.terminator {
                Some(terminator) => Ok(MirBlock {
                    id: b.id,
                    instructions: b.instructions,
                    terminator,
                }),
                None => Err(VerifyError::UnterminatedBlock {
                    function: function.clone(),
                    block: b.id.0,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MirFunction {
            name: function,
            signature: self.signature,
            entry: MirBlockId(0),
            blocks,
            value_types: self.value_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(params: Vec<MirType>, ret: MirType) -> MirFunctionSignature {
        MirFunctionSignature {
            params,
            ret,
            effects: vec![],
        }
    }

    #[test]
    fn parameters_take_the_first_value_ids() {
        let mut b = MirFunctionBuilder::new("add", sig(vec![MirType::Int, MirType::Int], MirType::Int));
        let sum = b.binary(MirBinaryOp::Add, b.param(0), b.param(1));
        b.ret(Some(sum));
        let f = b.finish().expect("finish");
        assert_eq!(sum, MirValueId(2));
        assert_eq!(f.value_types, vec![MirType::Int; 3]);
    }

    #[test]
    fn first_terminator_wins() {
        let mut b = MirFunctionBuilder::new("f", sig(vec![], MirType::Unit));
        let u = b.unit();
        b.ret(Some(u));
        assert!(b.is_terminated());
        b.unreachable();
        let f = b.finish().expect("finish");
        assert_eq!(f.blocks[0].terminator, MirTerminator::Return { value: Some(u) });
    }

    #[test]
    fn unterminated_blocks_are_rejected() {
        let mut b = MirFunctionBuilder::new("f", sig(vec![], MirType::Unit));
        let dangling = b.new_block();
        b.jump(dangling);
        assert_eq!(
            b.finish().unwrap_err(),
            VerifyError::UnterminatedBlock {
                function: "f".to_string(),
                block: 1
            }
        );
    }
}
