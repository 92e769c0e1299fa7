//! CFG → flat statement list with block markers.

use super::{Cfg, CfgProgram, Flat, FlatProgram, Frame, Program, Stmt};
use crate::error::{CompileError, Stage};

/// Concatenates each frame's blocks in order, opening each with a [`Stmt::Block`].
pub fn flatten(program: CfgProgram) -> Result<FlatProgram, CompileError> {
    let frames = program
        .frames
        .into_iter()
        .enumerate()
        .map(|(fi, frame)| {
            Ok(Frame {
                decls: frame.decls,
                body: flatten_cfg(fi, frame.body)?,
            })
        })
        .collect::<Result<_, CompileError>>()?;
    Ok(Program { frames })
}

fn flatten_cfg(frame: usize, cfg: Cfg) -> Result<Flat, CompileError> {
    let mut flat = Flat::default();
    for (i, block) in cfg.blocks.into_iter().enumerate() {
        if block.id.index() != i {
            return Err(CompileError::internal(
                Stage::Flatten,
                format!("frame{frame}: {} stored at position {i}", block.id),
            ));
        }
        flat.stmts.push(Stmt::Block(block.id));
        flat.stmts.extend(block.stmts);
        flat.labels.push(block.name);
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, BlockId, Decls};

    #[test]
    fn blocks_are_opened_with_markers() {
        let cfg = Program {
            frames: vec![Frame {
                decls: Decls::default(),
                body: Cfg {
                    blocks: vec![
                        Block {
                            id: BlockId(0),
                            name: "entry".to_owned(),
                            stmts: vec![Stmt::Token, Stmt::Branch(BlockId(1))],
                        },
                        Block {
                            id: BlockId(1),
                            name: "done".to_owned(),
                            stmts: vec![Stmt::Valid],
                        },
                    ],
                },
            }],
        };
        let flat = flatten(cfg).unwrap();
        let body = &flat.frames[0].body;
        assert_eq!(
            body.stmts,
            vec![
                Stmt::Block(BlockId(0)),
                Stmt::Token,
                Stmt::Branch(BlockId(1)),
                Stmt::Block(BlockId(1)),
                Stmt::Valid,
            ]
        );
        assert_eq!(body.labels, vec!["entry".to_owned(), "done".to_owned()]);
    }
}
