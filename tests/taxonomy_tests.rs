use std::io::Write;
use taxtree::{Taxonomy, TaxonomyError};
use tempfile::NamedTempFile;

// Fixtures follow the real taxdump layout: each field is `value\t|\t`, so
// with a plain tab split the child taxid sits at column 1, the parent at
// column 3, and the rank at column 5.
fn ncbi_nodes() -> NamedTempFile {
    let lines = [
        "1\t|\t1\t|\tno rank\t|",
        "131567\t|\t1\t|\tno rank\t|",
        "2\t|\t131567\t|\tsuperkingdom\t|",
        "2157\t|\t131567\t|\tsuperkingdom\t|",
        "1224\t|\t2\t|\tphylum\t|",
        "1236\t|\t1224\t|\tclass\t|",
        "91347\t|\t1236\t|\torder\t|",
        "543\t|\t91347\t|\tfamily\t|",
        "561\t|\t543\t|\tgenus\t|",
        "562\t|\t561\t|\tspecies\t|",
        "620\t|\t543\t|\tgenus\t|",
        "622\t|\t620\t|\tspecies\t|",
    ];
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

fn ncbi_merged() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "666\t|\t562\t|").unwrap();
    writeln!(file, "12\t|\t74109\t|").unwrap();
    file.flush().unwrap();
    file
}

fn ncbi_delnodes() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "9999\t|").unwrap();
    writeln!(file, "8888\t|").unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn builds_from_ncbi_nodes() {
    let nodes = ncbi_nodes();
    let taxonomy = Taxonomy::from_ncbi(nodes.path()).unwrap();
    assert_eq!(taxonomy.root(), 1);
    assert_eq!(taxonomy.max_taxid(), 131567);
    assert_eq!(taxonomy.node_count(), 12);
    assert_eq!(taxonomy.parent_of(562), Some(561));
    assert_eq!(taxonomy.file(), nodes.path());
}

#[test]
fn ranks_from_ncbi_nodes() {
    let nodes = ncbi_nodes();
    let taxonomy = Taxonomy::with_ranks_from_ncbi(nodes.path()).unwrap();
    assert_eq!(taxonomy.rank(562), "species");
    assert_eq!(taxonomy.rank(620), "genus");
    assert_eq!(taxonomy.rank(1), "no rank");
    assert_eq!(taxonomy.rank(4242), "");
    // no rank, superkingdom, phylum, class, order, family, genus, species
    assert_eq!(taxonomy.ranks().len(), 8);
}

#[test]
fn lca_over_ncbi_tree() {
    let nodes = ncbi_nodes();
    let taxonomy = Taxonomy::from_ncbi(nodes.path()).unwrap();
    // sibling species meet at their family
    assert_eq!(taxonomy.lca(562, 622), 543);
    // sibling superkingdoms meet at cellular organisms
    assert_eq!(taxonomy.lca(562, 2157), 131567);
    // ancestor absorption in both directions
    assert_eq!(taxonomy.lca(562, 2), 2);
    assert_eq!(taxonomy.lca(2, 562), 2);
    // unknown sentinel
    assert_eq!(taxonomy.lca(0, 562), 0);
    assert_eq!(taxonomy.lca(562, 0), 0);
}

#[test]
fn merged_and_deleted_nodes() {
    let nodes = ncbi_nodes();
    let mut taxonomy = Taxonomy::from_ncbi(nodes.path()).unwrap();

    let merged = ncbi_merged();
    taxonomy.load_merged_nodes_from_ncbi(merged.path()).unwrap();
    assert_eq!(taxonomy.is_merged(666), Some(562));
    assert_eq!(taxonomy.lca(666, 622), 543);
    // the merge target of 12 is itself absent from the tree
    assert_eq!(taxonomy.lca(12, 562), 0);

    let deleted = ncbi_delnodes();
    taxonomy.load_deleted_nodes_from_ncbi(deleted.path()).unwrap();
    assert!(taxonomy.is_deleted(9999));
    assert!(!taxonomy.is_deleted(562));
    assert_eq!(taxonomy.lca(9999, 562), 0);
}

#[test]
fn lineage_over_ncbi_tree() {
    let nodes = ncbi_nodes();
    let taxonomy = Taxonomy::from_ncbi(nodes.path()).unwrap();
    assert_eq!(
        taxonomy.lineage(562),
        Some(vec![1, 131567, 2, 1224, 1236, 91347, 543, 561, 562])
    );
    assert_eq!(taxonomy.lineage(1), Some(vec![1]));
    assert_eq!(taxonomy.lineage(31337), None);
}

#[test]
fn cached_queries_match_uncached_under_load() {
    use rayon::prelude::*;

    let nodes = ncbi_nodes();
    let merged = ncbi_merged();

    let plain = Taxonomy::from_ncbi(nodes.path()).unwrap();
    let mut cached = Taxonomy::from_ncbi(nodes.path()).unwrap();
    cached.load_merged_nodes_from_ncbi(merged.path()).unwrap();
    cached.enable_lca_cache();

    let mut plain_with_merged = Taxonomy::from_ncbi(nodes.path()).unwrap();
    plain_with_merged
        .load_merged_nodes_from_ncbi(merged.path())
        .unwrap();

    let taxids = [0u32, 1, 2, 562, 561, 543, 622, 620, 2157, 1224, 666, 31337];
    let pairs: Vec<(u32, u32)> = taxids
        .iter()
        .flat_map(|&a| taxids.iter().map(move |&b| (a, b)))
        .collect();

    let expected: Vec<u32> = pairs
        .iter()
        .map(|&(a, b)| plain_with_merged.lca(a, b))
        .collect();
    let observed: Vec<u32> = pairs.par_iter().map(|&(a, b)| cached.lca(a, b)).collect();
    assert_eq!(observed, expected);

    // merge-aware results differ from the bare store only where 666 appears
    assert_eq!(plain.lca(666, 622), 0);
    assert_eq!(cached.lca(666, 622), 543);
}

#[test]
fn bad_dump_reports_offending_token() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "1\t|\t1\t|\tno rank\t|").unwrap();
    writeln!(file, "two\t|\t1\t|\tgenus\t|").unwrap();
    file.flush().unwrap();

    let err = Taxonomy::from_ncbi(file.path()).unwrap_err();
    match err {
        TaxonomyError::Parse { line, token } => {
            assert_eq!(line, 2);
            assert_eq!(token, "two");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let err = Taxonomy::from_ncbi("/nonexistent/nodes.dmp").unwrap_err();
    assert!(matches!(err, TaxonomyError::Io(_)));
}
