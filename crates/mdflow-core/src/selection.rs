//! Atom selection language used by [`SystemSnapshot`](crate::structure::SystemSnapshot).
//!
//! Grammar:
//! ```text
//! expr   := and ("or" and)*
//! and    := unary ("and" unary)*
//! unary  := "not" unary | "(" expr ")" | term
//! term   := keyword | indices
//! ```
//! Keywords: `all`, `none`, `protein`, `ca_protein`, `ligand`, `water`,
//! `ions`, `noh`, `heavy`. Indices are zero-based, comma separated, with
//! inclusive ranges: `3,7`, `0-4,9`.

use crate::errors::{MdError, Result};
use crate::structure::Molecule;
use std::collections::BTreeSet;

const AMINO_ACIDS: &[&str] = &[
    "ALA", "ARG", "ASN", "ASP", "ASH", "CYS", "CYX", "CYM", "GLN", "GLU", "GLH", "GLY", "HIS",
    "HID", "HIE", "HIP", "ILE", "LEU", "LYS", "LYN", "MET", "PHE", "PRO", "SER", "THR", "TRP",
    "TYR", "VAL", "ACE", "NME",
];
const WATERS: &[&str] = &["HOH", "WAT", "TIP3", "TIP4", "SOL", "H2O"];
const IONS: &[&str] = &["NA", "NA+", "CL", "CL-", "K", "K+", "MG", "MG2", "CA", "CA2", "ZN", "ZN2", "LI", "CS", "RB", "BR"];
const LIGANDS: &[&str] = &["LIG", "UNL", "MOL", "UNK"];

/// Resolves `selector` against `molecule`; blank selectors select nothing.
pub fn select(molecule: &Molecule, selector: &str) -> Result<BTreeSet<usize>> {
    let tokens = tokenize(selector);
    if tokens.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        selector,
        molecule,
    };
    let set = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(MdError::selection(
            selector,
            format!("unexpected token '{}'", tokens[parser.pos]),
        ));
    }
    Ok(set)
}

/// Splits on whitespace and parentheses. Whitespace next to a comma is
/// dropped so `"3, 7"` stays a single index list.
fn tokenize(selector: &str) -> Vec<String> {
    selector
        .split(',')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(",")
        .replace('(', " ( ")
        .replace(')', " ) ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
    selector: &'a str,
    molecule: &'a Molecule,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let tok = self.tokens.get(self.pos).map(String::as_str);
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<BTreeSet<usize>> {
        let mut acc = self.and()?;
        while self.peek().map_or(false, |t| t.eq_ignore_ascii_case("or")) {
            self.pos += 1;
            let rhs = self.and()?;
            acc.extend(rhs);
        }
        Ok(acc)
    }

    fn and(&mut self) -> Result<BTreeSet<usize>> {
        let mut acc = self.unary()?;
        while self.peek().map_or(false, |t| t.eq_ignore_ascii_case("and")) {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = acc.intersection(&rhs).copied().collect();
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<BTreeSet<usize>> {
        match self.next() {
            Some(t) if t.eq_ignore_ascii_case("not") => {
                let inner = self.unary()?;
                Ok((0..self.molecule.atoms.len()).filter(|i| !inner.contains(i)).collect())
            }
            Some("(") => {
                let inner = self.expr()?;
                match self.next() {
                    Some(")") => Ok(inner),
                    _ => Err(MdError::selection(self.selector, "missing ')'")),
                }
            }
            Some(term) => self.term(term),
            None => Err(MdError::selection(self.selector, "unexpected end of selection")),
        }
    }

    fn term(&self, term: &str) -> Result<BTreeSet<usize>> {
        let atoms = &self.molecule.atoms;
        let by = |pred: &dyn Fn(usize) -> bool| -> BTreeSet<usize> {
            (0..atoms.len()).filter(|&i| pred(i)).collect()
        };
        let residue_in = |i: usize, names: &[&str]| {
            let res = atoms[i].residue_name.trim().to_ascii_uppercase();
            names.contains(&res.as_str())
        };

        let set = match term.to_ascii_lowercase().as_str() {
            "all" => by(&|_| true),
            "none" => BTreeSet::new(),
            "protein" => by(&|i| residue_in(i, AMINO_ACIDS)),
            "ca_protein" => by(&|i| residue_in(i, AMINO_ACIDS) && atoms[i].name.trim() == "CA"),
            "water" => by(&|i| residue_in(i, WATERS)),
            "ions" => by(&|i| residue_in(i, IONS)),
            "ligand" => by(&|i| residue_in(i, LIGANDS)),
            "noh" | "heavy" => by(&|i| atoms[i].element != 1),
            _ => self.indices(term)?,
        };
        Ok(set)
    }

    fn indices(&self, term: &str) -> Result<BTreeSet<usize>> {
        let n = self.molecule.atoms.len();
        let bad = |msg: String| MdError::selection(self.selector, msg);
        let parse = |s: &str| -> Result<usize> {
            s.trim()
                .parse::<usize>()
                .map_err(|_| bad(format!("unknown keyword or index '{}'", term)))
        };

        let mut set = BTreeSet::new();
        for part in term.split(',').filter(|p| !p.is_empty()) {
            let (lo, hi) = match part.split_once('-') {
                Some((a, b)) => (parse(a)?, parse(b)?),
                None => {
                    let v = parse(part)?;
                    (v, v)
                }
            };
            if lo > hi || hi >= n {
                return Err(bad(format!("index range {} outside 0..{}", part, n)));
            }
            set.extend(lo..=hi);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::MoleculeAtom;

    fn molecule() -> Molecule {
        let atom = |name: &str, element: u8, res: &str| MoleculeAtom {
            name: name.to_string(),
            element,
            residue_name: res.to_string(),
            residue_number: 1,
        };
        Molecule {
            title: "test".into(),
            atoms: vec![
                atom("N", 7, "ALA"),
                atom("CA", 6, "ALA"),
                atom("HA", 1, "ALA"),
                atom("C1", 6, "LIG"),
                atom("O", 8, "HOH"),
                atom("H1", 1, "HOH"),
                atom("NA", 11, "NA+"),
            ],
            bonds: vec![],
            coords: vec![[0.0; 3]; 7],
        }
    }

    #[test]
    fn test_keywords() {
        let m = molecule();
        assert_eq!(select(&m, "protein").unwrap(), BTreeSet::from([0, 1, 2]));
        assert_eq!(select(&m, "ca_protein").unwrap(), BTreeSet::from([1]));
        assert_eq!(select(&m, "ligand or ions").unwrap(), BTreeSet::from([3, 6]));
        assert_eq!(select(&m, "water and noh").unwrap(), BTreeSet::from([4]));
    }

    #[test]
    fn test_not_and_parentheses() {
        let m = molecule();
        assert_eq!(select(&m, "not (protein or water)").unwrap(), BTreeSet::from([3, 6]));
    }

    #[test]
    fn test_indices() {
        let m = molecule();
        assert_eq!(select(&m, "3,5").unwrap(), BTreeSet::from([3, 5]));
        assert_eq!(select(&m, "0-2 and noh").unwrap(), BTreeSet::from([0, 1]));
        assert!(select(&m, "0-9").is_err());
        assert!(select(&m, "backbone").is_err());
    }

    #[test]
    fn test_comma_separated_indices_with_spaces() {
        let m = molecule();
        assert_eq!(select(&m, "3, 5").unwrap(), BTreeSet::from([3, 5]));
        assert_eq!(select(&m, "0 ,2, 4-5 and noh").unwrap(), BTreeSet::from([0, 2, 4]));
        assert!(select(&m, "3 5").is_err());
    }

    #[test]
    fn test_blank_selects_nothing() {
        assert!(select(&molecule(), "   ").unwrap().is_empty());
    }
}
