//! Forward scans for closing statements
//!
//! Block constructs find their partner statement by walking forward from the
//! opener, counting nesting on opener/closer statement kinds.

use super::errors::ExecError;
use super::types::{JumpCache, Phrase, TokenKind};

/// Outcome of a forward scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookahead {
    /// Distance from the start position to the matching statement
    Found(usize),
    Missing,
    /// Nesting dropped below the requested level before a match
    NestingFault,
}

/// Scan `phrases[start..]` for a statement whose leading token is in `terms`
/// at nesting level `endlevel`. Indenters raise the level before the check,
/// dedenters lower it.
pub fn lookahead(
    phrases: &[Phrase],
    start: usize,
    mut indent: i32,
    endlevel: i32,
    terms: &[TokenKind],
    indenters: &[TokenKind],
    dedenters: &[TokenKind],
) -> Lookahead {
    let Some(range) = phrases.get(start..) else {
        return Lookahead::Missing;
    };
    for (i, phrase) in range.iter().enumerate() {
        let Some(lead) = phrase.leading() else {
            continue;
        };
        if indenters.contains(&lead) {
            indent += 1;
        }
        if dedenters.contains(&lead) {
            indent -= 1;
        }
        if indent < endlevel {
            return Lookahead::NestingFault;
        }
        if indent == endlevel && terms.contains(&lead) {
            return Lookahead::Found(i);
        }
    }
    Lookahead::Missing
}

const LOOP_OPENERS: &[TokenKind] = &[TokenKind::For, TokenKind::Foreach];

/// Absolute pc of the closer matching the opener at `pc`
pub fn find_block_end(
    phrases: &[Phrase],
    pc: usize,
    closer: TokenKind,
) -> Result<usize, ExecError> {
    let (openers, label): (&[TokenKind], &str) = match closer {
        TokenKind::Endfor => (LOOP_OPENERS, "ENDFOR"),
        TokenKind::Endwhile => (&[TokenKind::While], "ENDWHILE"),
        TokenKind::Endcase => (&[TokenKind::Case], "ENDCASE"),
        TokenKind::Endif => (&[TokenKind::If], "ENDIF"),
        TokenKind::Enddef => (&[TokenKind::Define], "ENDDEF"),
        TokenKind::Endstruct => (&[TokenKind::Struct], "ENDSTRUCT"),
        other => return Err(ExecError::syntax(format!("{:?} does not close a block", other))),
    };
    match lookahead(phrases, pc, 0, 0, &[closer], openers, &[closer]) {
        Lookahead::Found(d) => Ok(pc + d),
        Lookahead::Missing | Lookahead::NestingFault => {
            Err(ExecError::syntax(format!("missing {} for this block", label)))
        }
    }
}

/// ELSE/ENDIF distances for the IF at `pc`, memoized on the IF token
pub fn if_jumps(phrases: &[Phrase], pc: usize) -> Result<JumpCache, ExecError> {
    let head = phrases
        .get(pc)
        .and_then(|p| p.tokens.first())
        .ok_or_else(|| ExecError::syntax("IF without a statement"))?;
    if let Some(cached) = head.cached_jumps() {
        return Ok(cached);
    }

    let ifs = &[TokenKind::If];
    let endifs = &[TokenKind::Endif];
    let endif_distance = match lookahead(phrases, pc, 0, 0, endifs, ifs, endifs) {
        Lookahead::Found(d) => d,
        _ => return Err(ExecError::syntax("missing ENDIF for this IF")),
    };
    let else_distance = match lookahead(phrases, pc, 0, 1, &[TokenKind::Else], ifs, endifs) {
        Lookahead::Found(d) if d < endif_distance => Some(d),
        _ => None,
    };

    let jumps = JumpCache {
        else_distance,
        endif_distance,
    };
    head.remember_jumps(jumps);
    Ok(jumps)
}

/// ENDIF for an ELSE at `pc`
pub fn endif_from_else(phrases: &[Phrase], pc: usize) -> Result<usize, ExecError> {
    let endifs = &[TokenKind::Endif];
    match lookahead(phrases, pc, 1, 0, endifs, &[TokenKind::If], endifs) {
        Lookahead::Found(d) => Ok(pc + d),
        _ => Err(ExecError::syntax("ELSE without an ENDIF")),
    }
}

const CASE_CLAUSES: &[TokenKind] = &[
    TokenKind::Is,
    TokenKind::Has,
    TokenKind::Contains,
    TokenKind::Or,
];

/// Next clause of the enclosing CASE after `pc`, if any remain before ENDCASE
pub fn next_case_clause(phrases: &[Phrase], pc: usize) -> Option<usize> {
    match lookahead(
        phrases,
        pc + 1,
        0,
        0,
        CASE_CLAUSES,
        &[TokenKind::Case],
        &[TokenKind::Endcase],
    ) {
        Lookahead::Found(d) => Some(pc + 1 + d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::lexer;

    #[test]
    fn test_if_jumps_skip_nested_blocks() {
        let src = "if a\n if b\n x=1\n else\n x=2\n endif\nelse\n x=3\nendif";
        let phrases = lexer::phrases(src).unwrap();
        let jumps = if_jumps(&phrases, 0).unwrap();
        assert_eq!(jumps.else_distance, Some(6));
        assert_eq!(jumps.endif_distance, 8);
        // Second visit comes from the token cache
        assert_eq!(phrases[0].tokens[0].cached_jumps(), Some(jumps));
        assert_eq!(endif_from_else(&phrases, 6).unwrap(), 8);
    }

    #[test]
    fn test_if_without_else() {
        let phrases = lexer::phrases("if a\nx=1\nendif\nelse").unwrap();
        let jumps = if_jumps(&phrases, 0).unwrap();
        assert_eq!(jumps.else_distance, None);
        assert_eq!(jumps.endif_distance, 2);
    }

    #[test]
    fn test_missing_closer_is_syntax_error() {
        let phrases = lexer::phrases("while true\nx=1").unwrap();
        let err = find_block_end(&phrases, 0, TokenKind::Endwhile).unwrap_err();
        assert!(matches!(err, ExecError::Syntax(_)));
    }

    #[test]
    fn test_next_case_clause_ignores_inner_case() {
        let src = "case x\nis 1\n case y\n is 2\n endcase\nor\nendcase";
        let phrases = lexer::phrases(src).unwrap();
        assert_eq!(next_case_clause(&phrases, 1), Some(5));
        assert_eq!(next_case_clause(&phrases, 5), None);
        assert_eq!(find_block_end(&phrases, 0, TokenKind::Endcase).unwrap(), 6);
    }
}
