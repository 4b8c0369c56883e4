//! Molecular system snapshot: chemistry-level topology plus the
//! parametrized structure the engine integrates.
//!
//! Chemistry-level coordinates (`Molecule::coords`) are in Å, engine
//! coordinates (`ParametrizedStructure::positions`) in nm. Writing engine
//! positions back through [`StructureProvider::with_state`] keeps the two in
//! step.

use crate::errors::{MdError, Result};
use crate::selection;
use crate::system::HarmonicBond;
use crate::traits::StructureProvider;
use crate::types::{BoxVectors, Vec3};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

const NM_TO_ANGSTROM: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoleculeAtom {
    pub name: String,
    /// Atomic number
    pub element: u8,
    pub residue_name: String,
    #[serde(default)]
    pub residue_number: i32,
}

/// Chemistry-level representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    pub title: String,
    pub atoms: Vec<MoleculeAtom>,
    #[serde(default)]
    pub bonds: Vec<(usize, usize)>,
    /// Å
    pub coords: Vec<Vec3>,
}

/// Per-atom force-field parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtomParameters {
    /// amu
    pub mass: f64,
    /// e
    #[serde(default)]
    pub charge: f64,
    /// nm
    #[serde(default)]
    pub sigma: f64,
    /// kJ/mol
    #[serde(default)]
    pub epsilon: f64,
}

/// Parametrized structure with engine-side state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametrizedStructure {
    pub atoms: Vec<AtomParameters>,
    #[serde(default)]
    pub bonds: Vec<HarmonicBond>,
    /// nm
    pub positions: Vec<Vec3>,
    /// nm/ps, absent before the first dynamics stage
    #[serde(default)]
    pub velocities: Option<Vec<Vec3>>,
    #[serde(default)]
    pub box_vectors: Option<BoxVectors>,
}

/// A complete system snapshot, the unit passed between stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub molecule: Molecule,
    pub structure: ParametrizedStructure,
    /// Per-system parameter overrides (e.g. `temperature = "310"`).
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl SystemSnapshot {
    pub fn new(molecule: Molecule, structure: ParametrizedStructure) -> Result<Self> {
        let snapshot = Self {
            molecule,
            structure,
            overrides: BTreeMap::new(),
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn atom_count(&self) -> usize {
        self.structure.atoms.len()
    }

    /// Checks that every per-atom array has the same length and bonds are
    /// in range.
    pub fn validate(&self) -> Result<()> {
        let n = self.structure.atoms.len();
        let check = |what: &str, len: usize| {
            if len != n {
                Err(MdError::validation(format!(
                    "{} has {} entries, structure has {} atoms",
                    what, len, n
                )))
            } else {
                Ok(())
            }
        };
        check("molecule atoms", self.molecule.atoms.len())?;
        check("molecule coordinates", self.molecule.coords.len())?;
        check("positions", self.structure.positions.len())?;
        if let Some(v) = &self.structure.velocities {
            check("velocities", v.len())?;
        }
        for b in &self.structure.bonds {
            if b.i >= n || b.j >= n || b.i == b.j {
                return Err(MdError::validation(format!(
                    "bond ({}, {}) invalid for {} atoms",
                    b.i, b.j, n
                )));
            }
        }
        if let Some((i, j)) = self.molecule.bonds.iter().find(|(i, j)| *i >= n || *j >= n) {
            return Err(MdError::validation(format!(
                "topology bond ({}, {}) invalid for {} atoms",
                i, j, n
            )));
        }
        if let Some(bv) = &self.structure.box_vectors {
            if !bv.is_reduced_form() {
                return Err(MdError::validation(format!(
                    "box vectors {:?} are not in reduced form",
                    bv.0
                )));
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let snapshot: Self = serde_json::from_slice(&data)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Copy restricted to `indices`, with bonds re-indexed.
    fn subset(&self, indices: &[usize]) -> Self {
        let remap: HashMap<usize, usize> =
            indices.iter().enumerate().map(|(new, &old)| (old, new)).collect();
        let pick = |v: &[Vec3]| indices.iter().map(|&i| v[i]).collect::<Vec<_>>();

        let molecule = Molecule {
            title: self.molecule.title.clone(),
            atoms: indices.iter().map(|&i| self.molecule.atoms[i].clone()).collect(),
            bonds: self
                .molecule
                .bonds
                .iter()
                .filter_map(|(i, j)| Some((*remap.get(i)?, *remap.get(j)?)))
                .collect(),
            coords: pick(&self.molecule.coords),
        };
        let structure = ParametrizedStructure {
            atoms: indices.iter().map(|&i| self.structure.atoms[i]).collect(),
            bonds: self
                .structure
                .bonds
                .iter()
                .filter_map(|b| {
                    Some(HarmonicBond {
                        i: *remap.get(&b.i)?,
                        j: *remap.get(&b.j)?,
                        ..*b
                    })
                })
                .collect(),
            positions: pick(&self.structure.positions),
            velocities: self.structure.velocities.as_deref().map(pick),
            box_vectors: self.structure.box_vectors,
        };
        Self {
            molecule,
            structure,
            overrides: self.overrides.clone(),
        }
    }
}

impl StructureProvider for SystemSnapshot {
    fn molecule(&self) -> &Molecule {
        &self.molecule
    }

    fn structure(&self) -> &ParametrizedStructure {
        &self.structure
    }

    fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    fn select(&self, selector: &str) -> Result<BTreeSet<usize>> {
        selection::select(&self.molecule, selector)
    }

    fn split(&self, selector: &str) -> Result<(Self, Self)> {
        let selected = self.select(selector)?;
        let (inside, outside): (Vec<usize>, Vec<usize>) =
            (0..self.atom_count()).partition(|i| selected.contains(i));
        Ok((self.subset(&inside), self.subset(&outside)))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    fn with_state(
        &self,
        positions: Vec<Vec3>,
        velocities: Option<Vec<Vec3>>,
        box_vectors: Option<BoxVectors>,
    ) -> Result<Self> {
        let mut next = self.clone();
        next.molecule.coords = positions
            .iter()
            .map(|p| [p[0] * NM_TO_ANGSTROM, p[1] * NM_TO_ANGSTROM, p[2] * NM_TO_ANGSTROM])
            .collect();
        next.structure.positions = positions;
        if velocities.is_some() {
            next.structure.velocities = velocities;
        }
        if box_vectors.is_some() {
            next.structure.box_vectors = box_vectors;
        }
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SystemSnapshot {
        let atom = |name: &str, element: u8, res: &str| MoleculeAtom {
            name: name.into(),
            element,
            residue_name: res.into(),
            residue_number: 1,
        };
        let params = AtomParameters {
            mass: 12.0,
            charge: 0.0,
            sigma: 0.3,
            epsilon: 0.4,
        };
        let positions = vec![[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [0.5, 0.5, 0.5]];
        SystemSnapshot::new(
            Molecule {
                title: "pair+ion".into(),
                atoms: vec![atom("C1", 6, "LIG"), atom("C2", 6, "LIG"), atom("NA", 11, "NA")],
                bonds: vec![(0, 1)],
                coords: positions.iter().map(|p| [p[0] * 10.0, p[1] * 10.0, p[2] * 10.0]).collect(),
            },
            ParametrizedStructure {
                atoms: vec![params; 3],
                bonds: vec![HarmonicBond { i: 0, j: 1, length: 0.15, k: 1000.0 }],
                positions,
                velocities: None,
                box_vectors: Some(BoxVectors::orthorhombic(2.0, 2.0, 2.0)),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_validate_rejects_length_mismatch() {
        let mut s = snapshot();
        s.structure.positions.pop();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unreduced_box() {
        let mut s = snapshot();
        s.structure.box_vectors = Some(BoxVectors([[2.0, 0.3, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]));
        assert!(s.validate().is_err());

        s.structure.box_vectors = Some(BoxVectors([[2.0, 0.0, 0.0], [0.5, 2.0, 0.0], [0.5, 0.5, 2.0]]));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_split_reindexes_bonds() {
        let (lig, rest) = snapshot().split("ligand").unwrap();
        assert_eq!(lig.atom_count(), 2);
        assert_eq!(lig.structure.bonds.len(), 1);
        assert_eq!(lig.molecule.bonds, vec![(0, 1)]);
        assert_eq!(rest.atom_count(), 1);
        assert!(rest.structure.bonds.is_empty());
    }

    #[test]
    fn test_with_state_propagates_coordinates() {
        let s = snapshot();
        let moved = vec![[0.2, 0.0, 0.0], [0.3, 0.0, 0.0], [0.5, 0.5, 0.5]];
        let next = s.with_state(moved, Some(vec![[0.0; 3]; 3]), None).unwrap();
        assert!((next.molecule.coords[0][0] - 2.0).abs() < 1e-12);
        assert!(next.structure.velocities.is_some());
        assert_eq!(next.structure.box_vectors, s.structure.box_vectors);
    }

    #[test]
    fn test_digest_changes_with_content() {
        let s = snapshot();
        let d1 = s.digest().unwrap();
        assert_eq!(d1, s.clone().digest().unwrap());
        let other = s.with_override("temperature", "310");
        assert_ne!(d1, other.digest().unwrap());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.json");
        let s = snapshot();
        s.save(&path).unwrap();
        assert_eq!(SystemSnapshot::load(&path).unwrap(), s);
    }
}
