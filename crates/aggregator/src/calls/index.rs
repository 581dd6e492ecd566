use anyhow::{Result, ensure};

/// Records the lengths of nested groups before they are flattened.
pub fn create_indexes<T>(groups: &[Vec<T>]) -> Vec<usize> {
    groups.iter().map(Vec::len).collect()
}

/// Re-nests a flat arena according to a previously recorded index. Pure
/// function of its inputs; fails if the index does not account for every
/// element exactly once.
pub fn rebuild_from_index<T>(flat: Vec<T>, index: &[usize]) -> Result<Vec<Vec<T>>> {
    ensure!(
        index.iter().sum::<usize>() == flat.len(),
        "index covers {} elements but arena holds {}",
        index.iter().sum::<usize>(),
        flat.len(),
    );
    let mut arena = flat.into_iter();
    Ok(index
        .iter()
        .map(|&len| arena.by_ref().take(len).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nesting() {
        let groups = vec![vec![1, 2], vec![], vec![3]];
        let index = create_indexes(&groups);
        assert_eq!(index, vec![2, 0, 1]);
        let flat: Vec<_> = groups.iter().flatten().copied().collect();
        assert_eq!(rebuild_from_index(flat, &index).unwrap(), groups);
    }

    #[test]
    fn rejects_inconsistent_index() {
        assert!(rebuild_from_index(vec![1, 2, 3], &[2, 2]).is_err());
        assert!(rebuild_from_index(vec![1, 2, 3], &[2]).is_err());
    }

    #[test]
    fn empty_index_empty_arena() {
        assert!(rebuild_from_index(Vec::<u8>::new(), &[]).unwrap().is_empty());
    }
}
