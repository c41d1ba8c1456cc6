//! Structural checks over a finished module.

use std::collections::{BTreeMap, BTreeSet};

use crate::{MirCallee, MirFunction, MirInst, MirModule};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("block bb{block} of `{function}` has no terminator")]
    UnterminatedBlock { function: String, block: u32 },
    #[error("duplicate function `{function}`")]
    DuplicateFunction { function: String },
    #[error("entry block bb{block} of `{function}` does not exist")]
    MissingEntry { function: String, block: u32 },
    #[error("`{function}` branches to unknown block bb{block}")]
    UnknownBlock { function: String, block: u32 },
    #[error("value `%{value}` is defined more than once in `{function}`")]
    DuplicateValue { function: String, value: u32 },
    #[error("value `%{value}` is used but never defined in `{function}`")]
    UndefinedValue { function: String, value: u32 },
    #[error("phi `%{value}` in bb{block} of `{function}` names bb{pred}, which is not a predecessor")]
    PhiPredecessor {
        function: String,
        block: u32,
        value: u32,
        pred: u32,
    },
    #[error("phi `%{value}` in bb{block} of `{function}` follows a non-phi instruction")]
    PhiNotLeading {
        function: String,
        block: u32,
        value: u32,
    },
    #[error("`{function}` calls unknown {kind} `{callee}`")]
    UnknownCallee {
        function: String,
        kind: &'static str,
        callee: String,
    },
    #[error("`{function}` calls `{callee}` with {found} argument(s), expected {expected}")]
    CallArity {
        function: String,
        callee: String,
        expected: usize,
        found: usize,
    },
    #[error("`{function}` uses undeclared layout `{type_name}`")]
    UnknownLayout { function: String, type_name: String },
}

pub fn verify_module(module: &MirModule) -> Result<(), VerifyError> {
    let mut names = BTreeSet::new();
    for function in &module.functions {
        if !names.insert(function.name.as_str()) {
            return Err(VerifyError::DuplicateFunction {
                function: function.name.clone(),
            });
        }
    }
    for function in &module.functions {
        verify_function(module, function)?;
    }
    Ok(())
}

fn verify_function(module: &MirModule, function: &MirFunction) -> Result<(), VerifyError> {
    let name = &function.name;
    let block_ids: BTreeSet<u32> = function.blocks.iter().map(|b| b.id.0).collect();
    if !block_ids.contains(&function.entry.0) {
        return Err(VerifyError::MissingEntry {
            function: name.clone(),
            block: function.entry.0,
        });
    }

    let mut predecessors: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for block in &function.blocks {
        for succ in block.terminator.successors() {
            if !block_ids.contains(&succ.0) {
                return Err(VerifyError::UnknownBlock {
                    function: name.clone(),
                    block: succ.0,
                });
            }
            predecessors.entry(succ.0).or_default().insert(block.id.0);
        }
    }

    // Parameters are defined on entry.
    let mut defined: BTreeSet<u32> = (0..function.signature.params.len() as u32).collect();
    for block in &function.blocks {
        for inst in &block.instructions {
            let dest = inst.dest().0;
            if !defined.insert(dest) {
                return Err(VerifyError::DuplicateValue {
                    function: name.clone(),
                    value: dest,
                });
            }
        }
    }

    for block in &function.blocks {
        let mut past_phis = false;
        for inst in &block.instructions {
            for operand in inst.operands() {
                if !defined.contains(&operand.0) {
                    return Err(VerifyError::UndefinedValue {
                        function: name.clone(),
                        value: operand.0,
                    });
                }
            }
            match inst {
                MirInst::Phi { dest, incoming, .. } => {
                    if past_phis {
                        return Err(VerifyError::PhiNotLeading {
                            function: name.clone(),
                            block: block.id.0,
                            value: dest.0,
                        });
                    }
                    let preds = predecessors.get(&block.id.0);
                    for (pred, _) in incoming {
                        if !preds.is_some_and(|p| p.contains(&pred.0)) {
                            return Err(VerifyError::PhiPredecessor {
                                function: name.clone(),
                                block: block.id.0,
                                value: dest.0,
                                pred: pred.0,
                            });
                        }
                    }
                }
                MirInst::Call { callee, args, .. } => {
                    past_phis = true;
                    verify_callee(module, name, callee, args.len())?;
                }
                MirInst::FunctionRef { function: target, .. } => {
                    past_phis = true;
                    if module.function(target).is_none() {
                        return Err(VerifyError::UnknownCallee {
                            function: name.clone(),
                            kind: "function",
                            callee: target.clone(),
                        });
                    }
                }
                MirInst::SumInit { sum_type, .. }
                | MirInst::SumTagLoad { sum_type, .. }
                | MirInst::SumPayloadLoad { sum_type, .. } => {
                    past_phis = true;
                    if module.layouts.sum(sum_type).is_none() {
                        return Err(VerifyError::UnknownLayout {
                            function: name.clone(),
                            type_name: sum_type.clone(),
                        });
                    }
                }
                MirInst::RecordInit { record_type, .. }
                | MirInst::RecordFieldLoad { record_type, .. } => {
                    past_phis = true;
                    if module.layouts.record(record_type).is_none() {
                        return Err(VerifyError::UnknownLayout {
                            function: name.clone(),
                            type_name: record_type.clone(),
                        });
                    }
                }
                _ => past_phis = true,
            }
        }
        for operand in block.terminator.operands() {
            if !defined.contains(&operand.0) {
                return Err(VerifyError::UndefinedValue {
                    function: name.clone(),
                    value: operand.0,
                });
            }
        }
    }
    Ok(())
}

fn verify_callee(
    module: &MirModule,
    function: &str,
    callee: &MirCallee,
    arg_count: usize,
) -> Result<(), VerifyError> {
    let (kind, target, expected) = match callee {
        MirCallee::Local(target) => (
            "function",
            target,
            module.function(target).map(|f| f.signature.params.len()),
        ),
        MirCallee::External(target) => (
            "external",
            target,
            module.external(target).map(|e| e.params.len()),
        ),
        MirCallee::Value(_) => return Ok(()),
    };
    match expected {
        None => Err(VerifyError::UnknownCallee {
            function: function.to_string(),
            kind,
            callee: target.clone(),
        }),
        Some(expected) if expected != arg_count => Err(VerifyError::CallArity {
            function: function.to_string(),
            callee: target.clone(),
            expected,
            found: arg_count,
        }),
        Some(_) => Ok(()),
    }
}
