use roaring::RoaringBitmap;

use crate::core::error::Result;
use crate::core::types::DocId;
use crate::posting::Posting;

/// One barrel's posting contribution to a merge, tagged with the barrel's
/// rank (older barrels first) so the merge can resolve duplicate doc ids by
/// "newer barrel wins" (§4.5 update semantics: re-indexing a document writes
/// a fresh occurrence into the newest barrel; the old one is shadowed rather
/// than patched in place).
pub struct MergeInput {
    pub barrel_rank: u32,
    pub posting: Box<dyn Posting>,
    /// Doc ids local to this barrel that are tombstoned (deleted or
    /// superseded by a newer barrel's update). Entries for these doc ids are
    /// dropped during the merge.
    pub deleted: Option<RoaringBitmap>,
}

/// One document's merged-in occurrence, with the positions pulled from
/// whichever posting supplied it.
pub struct MergedDoc {
    pub doc_id: DocId,
    pub freq: u32,
    pub positions: Vec<u32>,
}

/// Merge postings from multiple barrels into the doc-id-ordered sequence a
/// new, combined barrel's posting should contain. When two barrels have an
/// entry for the same doc id, the one from the barrel with the larger
/// `barrel_rank` (newer) wins and the older entry is discarded — this is how
/// document updates are reconciled without a barrel ever being patched in
/// place (§4.5, §9 "update via shadowing").
///
/// Tombstoned doc ids (present in a barrel's `deleted` bitmap) are dropped
/// entirely; if every contributing barrel's entry for a doc id is
/// tombstoned, the doc does not appear in the output.
pub fn merge_postings(mut inputs: Vec<MergeInput>) -> Result<Vec<MergedDoc>> {
    let mut heads: Vec<Option<DocId>> = Vec::with_capacity(inputs.len());
    for input in inputs.iter_mut() {
        let has = input.posting.next()?;
        heads.push(if has { Some(input.posting.doc()) } else { None });
    }

    let mut out = Vec::new();
    loop {
        let min_doc = heads.iter().flatten().min().copied();
        let Some(min_doc) = min_doc else { break };

        // Among all barrels currently positioned at `min_doc`, the newest
        // (highest rank) wins; everyone else's entry for this doc is skipped
        // and their cursor advanced past it.
        let mut winner: Option<usize> = None;
        for (i, head) in heads.iter().enumerate() {
            if *head != Some(min_doc) {
                continue;
            }
            let tombstoned = inputs[i]
                .deleted
                .as_ref()
                .is_some_and(|b| b.contains(min_doc.value()));
            if tombstoned {
                continue;
            }
            match winner {
                None => winner = Some(i),
                Some(w) if inputs[i].barrel_rank > inputs[w].barrel_rank => winner = Some(i),
                _ => {}
            }
        }

        if let Some(w) = winner {
            let freq = inputs[w].posting.freq();
            let mut positions = Vec::with_capacity(freq as usize);
            while let Some(p) = inputs[w].posting.next_position()? {
                positions.push(p);
            }
            out.push(MergedDoc {
                doc_id: min_doc,
                freq,
                positions,
            });
        }

        // Advance every barrel positioned at min_doc, draining positions for
        // any that were shadowed rather than chosen.
        for (i, head) in heads.iter_mut().enumerate() {
            if *head != Some(min_doc) {
                continue;
            }
            if Some(i) != winner {
                while inputs[i].posting.next_position()?.is_some() {}
            }
            let has_next = inputs[i].posting.next()?;
            *head = if has_next { Some(inputs[i].posting.doc()) } else { None };
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::in_memory::InMemoryPosting;

    fn posting(entries: &[(u32, &[u32])]) -> InMemoryPosting {
        let mut p = InMemoryPosting::new();
        for (doc, positions) in entries {
            for &pos in *positions {
                p.add_occurrence(DocId(*doc), pos).unwrap();
            }
        }
        p
    }

    #[test]
    fn merges_disjoint_postings_in_doc_order() {
        let a = posting(&[(1, &[0]), (5, &[2])]);
        let b = posting(&[(3, &[1])]);
        let merged = merge_postings(vec![
            MergeInput { barrel_rank: 0, posting: Box::new(a.cursor()), deleted: None },
            MergeInput { barrel_rank: 1, posting: Box::new(b.cursor()), deleted: None },
        ])
        .unwrap();
        let ids: Vec<u32> = merged.iter().map(|d| d.doc_id.value()).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn newer_barrel_shadows_older_on_matching_doc_id() {
        let old = posting(&[(1, &[0, 1])]);
        let newer = posting(&[(1, &[9])]);
        let merged = merge_postings(vec![
            MergeInput { barrel_rank: 0, posting: Box::new(old.cursor()), deleted: None },
            MergeInput { barrel_rank: 1, posting: Box::new(newer.cursor()), deleted: None },
        ])
        .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].positions, vec![9]);
    }

    #[test]
    fn tombstoned_doc_is_dropped() {
        let a = posting(&[(1, &[0]), (2, &[0])]);
        let mut deleted = RoaringBitmap::new();
        deleted.insert(1);
        let merged = merge_postings(vec![MergeInput {
            barrel_rank: 0,
            posting: Box::new(a.cursor()),
            deleted: Some(deleted),
        }])
        .unwrap();
        let ids: Vec<u32> = merged.iter().map(|d| d.doc_id.value()).collect();
        assert_eq!(ids, vec![2]);
    }
}
