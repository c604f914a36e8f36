// src/process/proof.rs
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::Table;

pub const DEFAULT_PROOF_SIZE: usize = 15;

/// How proof rows are chosen among the candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofPick {
    #[default]
    Random,
    /// The earliest rows in source order; the same input gives the same proof.
    First,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofSpec {
    pub size: usize,
    pub pick: ProofPick,
    /// When some candidate row has this column filled, one such row is
    /// always part of the proof.
    pub required_column: Option<String>,
    /// Rows with any of these blank are skipped, unless that leaves nothing.
    /// Names the table does not carry are ignored.
    pub critical_columns: Vec<String>,
}

impl Default for ProofSpec {
    fn default() -> Self {
        Self {
            size: DEFAULT_PROOF_SIZE,
            pick: ProofPick::Random,
            required_column: None,
            critical_columns: Vec::new(),
        }
    }
}

impl ProofSpec {
    pub fn with_required(mut self, column: &str) -> Self {
        self.required_column = Some(column.to_string());
        self
    }

    pub fn first_rows(mut self) -> Self {
        self.pick = ProofPick::First;
        self
    }
}

/// Draw a proof sample. Random picks keep their source order; first-rows
/// picks lead with the required row.
pub fn draw_proof<R: Rng + ?Sized>(table: &Table, spec: &ProofSpec, rng: &mut R) -> Table {
    if table.len() <= spec.size {
        let mut whole = table.clone();
        if spec.pick == ProofPick::First {
            let col = spec.required_column.as_deref().and_then(|c| table.column_index(c));
            let first = col.and_then(|c| whole.rows.iter().position(|r| !r[c].trim().is_empty()));
            if let Some(i) = first {
                let row = whole.rows.remove(i);
                whole.rows.insert(0, row);
            }
        }
        return whole;
    }

    let critical: Vec<usize> = spec
        .critical_columns
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();
    let mut candidates: Vec<usize> = (0..table.len())
        .filter(|&i| table.row_is_complete(&table.rows[i], &critical))
        .collect();
    if candidates.is_empty() {
        debug!("no row has every critical column; sampling from all rows");
        candidates = (0..table.len()).collect();
    }

    let mut picked: Vec<usize> = Vec::with_capacity(spec.size);
    let required = spec
        .required_column
        .as_deref()
        .and_then(|c| table.column_index(c));
    if let Some(col) = required {
        let with_value: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| !table.rows[i][col].trim().is_empty())
            .collect();
        if !with_value.is_empty() && spec.size > 0 {
            let chosen = match spec.pick {
                ProofPick::Random => with_value[rng.random_range(0..with_value.len())],
                ProofPick::First => with_value[0],
            };
            picked.push(chosen);
            candidates.retain(|&i| i != chosen);
        }
    }

    let want = spec.size.saturating_sub(picked.len()).min(candidates.len());
    match spec.pick {
        ProofPick::Random => picked.extend(
            index::sample(rng, candidates.len(), want)
                .into_iter()
                .map(|k| candidates[k]),
        ),
        ProofPick::First => picked.extend(candidates.iter().take(want)),
    }
    if spec.pick == ProofPick::Random {
        picked.sort_unstable();
    }

    debug!(from = table.len(), picked = picked.len(), "proof drawn");
    Table {
        headers: table.headers.clone(),
        rows: picked.into_iter().map(|i| table.rows[i].clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::table;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn licensed_table(n: usize, licensed_at: Option<usize>) -> Table {
        let mut t = table(&["id", "Store_License", "City"], &[]);
        for i in 0..n {
            let lic = if Some(i) == licensed_at { "LIC-1" } else { "" };
            t.rows
                .push(vec![i.to_string(), lic.to_string(), "Waco".to_string()]);
        }
        t
    }

    #[test]
    fn small_tables_are_returned_whole() {
        let t = licensed_table(10, None);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(draw_proof(&t, &ProofSpec::default(), &mut rng), t);
    }

    #[test]
    fn never_more_than_size_and_includes_required_row() {
        let spec = ProofSpec::default().with_required("Store_License");
        for seed in 0..50 {
            let t = licensed_table(200, Some(137));
            let mut rng = StdRng::seed_from_u64(seed);
            let p = draw_proof(&t, &spec, &mut rng);
            assert_eq!(p.len(), DEFAULT_PROOF_SIZE);
            assert!(p.rows.iter().any(|r| r[1] == "LIC-1"), "seed {seed}");
        }
    }

    #[test]
    fn sample_has_no_duplicates_and_keeps_order() {
        let t = licensed_table(40, Some(3));
        let mut rng = StdRng::seed_from_u64(7);
        let p = draw_proof(&t, &ProofSpec::default().with_required("Store_License"), &mut rng);
        let ids: Vec<usize> = p.rows.iter().map(|r| r[0].parse().unwrap()).collect();
        let mut sorted = ids.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn incomplete_rows_are_skipped_when_possible() {
        let mut t = licensed_table(30, None);
        for r in t.rows.iter_mut().skip(20) {
            r[2].clear();
        }
        let spec = ProofSpec {
            critical_columns: vec!["City".into(), "Not There".into()],
            ..ProofSpec::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let p = draw_proof(&t, &spec, &mut rng);
        assert_eq!(p.len(), DEFAULT_PROOF_SIZE);
        assert!(p.rows.iter().all(|r| !r[2].is_empty()));
    }

    #[test]
    fn first_rows_lead_with_the_licensed_row_and_are_stable() {
        let t = licensed_table(40, Some(30));
        let spec = ProofSpec::default().with_required("Store_License").first_rows();
        let p1 = draw_proof(&t, &spec, &mut StdRng::seed_from_u64(1));
        let p2 = draw_proof(&t, &spec, &mut StdRng::seed_from_u64(2));
        assert_eq!(p1, p2);
        let ids: Vec<usize> = p1.rows.iter().map(|r| r[0].parse().unwrap()).collect();
        let mut expected = vec![30];
        expected.extend(0..14);
        assert_eq!(ids, expected);

        let small = licensed_table(5, Some(3));
        let p = draw_proof(&small, &spec, &mut StdRng::seed_from_u64(1));
        let ids: Vec<&str> = p.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["3", "0", "1", "2", "4"]);
    }

    #[test]
    fn fewer_complete_rows_than_size() {
        let mut t = licensed_table(30, None);
        for r in t.rows.iter_mut().skip(4) {
            r[2].clear();
        }
        let spec = ProofSpec {
            critical_columns: vec!["City".into()],
            ..ProofSpec::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(draw_proof(&t, &spec, &mut rng).len(), 4);
    }
}
