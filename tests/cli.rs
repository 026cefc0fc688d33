//! End-to-end CLI coverage: `vocab-learn` -> `vocab-build-db` ->
//! `vocab-match` over a tiny hand-written key-file fixture, per
//! SPEC_FULL.md §8's ambient CLI testable property.

use std::fs;
use std::io::Write;
use std::path::Path;

use assert_cmd::Command;

const DIM: usize = 128;
const LINE_WIDTHS: [usize; 7] = [20, 20, 20, 20, 20, 20, 8];

fn write_key_file(path: &Path, descriptor_values: &[u8]) {
    let mut f = fs::File::create(path).unwrap();
    writeln!(f, "{} {}", descriptor_values.len(), DIM).unwrap();
    for &v in descriptor_values {
        writeln!(f, "0.0 0.0 2.0 0.0").unwrap();
        let mut offset = 0;
        for &width in LINE_WIDTHS.iter() {
            let row: Vec<String> = (0..width).map(|_| v.to_string()).collect();
            writeln!(f, "{}", row.join(" ")).unwrap();
            offset += width;
        }
        assert_eq!(offset, DIM);
    }
}

fn write_list_file(path: &Path, entries: &[&Path]) {
    let mut f = fs::File::create(path).unwrap();
    for entry in entries {
        writeln!(f, "{}", entry.display()).unwrap();
    }
}

#[test]
fn learn_build_db_and_match_round_trip() {
    let dir = tempfile::tempdir().unwrap();

    let train_key = dir.path().join("train.key");
    write_key_file(&train_key, &[0, 1, 2, 3, 4, 5, 6, 7]);
    let train_list = dir.path().join("train_list.txt");
    write_list_file(&train_list, &[&train_key]);

    let tree_path = dir.path().join("tree.bin");
    Command::cargo_bin("vocab-learn")
        .unwrap()
        .args([
            train_list.to_str().unwrap(),
            "1",
            "2",
            "3",
            tree_path.to_str().unwrap(),
        ])
        .assert()
        .success();
    assert!(tree_path.exists());

    let image0_key = dir.path().join("image0.key");
    write_key_file(&image0_key, &[0, 1, 2, 3]);
    let image1_key = dir.path().join("image1.key");
    write_key_file(&image1_key, &[4, 5, 6, 7]);
    let db_list = dir.path().join("db_list.txt");
    write_list_file(&db_list, &[&image0_key, &image1_key]);

    let db_tree_path = dir.path().join("db_tree.bin");
    Command::cargo_bin("vocab-build-db")
        .unwrap()
        .args([
            db_list.to_str().unwrap(),
            tree_path.to_str().unwrap(),
            db_tree_path.to_str().unwrap(),
        ])
        .assert()
        .success();
    assert!(db_tree_path.exists());

    let query_key = dir.path().join("query.key");
    write_key_file(&query_key, &[0, 1, 2, 3]);
    let query_list = dir.path().join("query_list.txt");
    write_list_file(&query_list, &[&query_key]);

    let matches_path = dir.path().join("matches.txt");
    Command::cargo_bin("vocab-match")
        .unwrap()
        .args([
            db_tree_path.to_str().unwrap(),
            db_list.to_str().unwrap(),
            query_list.to_str().unwrap(),
            "2",
            matches_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let matches = fs::read_to_string(&matches_path).unwrap();
    assert!(
        matches.lines().next().unwrap().starts_with("0 0 "),
        "expected query 0 to rank its own image (db index 0) first, got: {}",
        matches
    );
}

#[test]
fn vocab_learn_rejects_too_few_training_descriptors() {
    let dir = tempfile::tempdir().unwrap();
    let key = dir.path().join("tiny.key");
    write_key_file(&key, &[0]);
    let list = dir.path().join("list.txt");
    write_list_file(&list, &[&key]);

    let tree_path = dir.path().join("tree.bin");
    Command::cargo_bin("vocab-learn")
        .unwrap()
        .args([
            list.to_str().unwrap(),
            "1",
            "4",
            "1",
            tree_path.to_str().unwrap(),
        ])
        .assert()
        .failure();
}
