//! End-to-end tests of the operation executor against a qpdf-backed tool

mod common;

use common::{minimal_pdf, page_count_of, Fault, Harness, LibraryTool};
use pdf_workbench::config::SplitPolicy;
use pdf_workbench::ops::{
    CompressionQuality, LibraryExtractor, OperationExecutor, SplitOutcome, SplitSelection,
    SplitStrategy, UploadedFile,
};
use pdf_workbench::tool::ToolInvoker;
use pdf_workbench::workspace::WorkspaceManager;
use pdf_workbench::Error;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn upload(name: &str, pages: u32) -> UploadedFile {
    UploadedFile::new(name, minimal_pdf(pages))
}

fn page_numbers(outcome: &SplitOutcome) -> Vec<u32> {
    outcome.files.iter().filter_map(|f| f.page_number).collect()
}

#[tokio::test]
async fn test_merge_concatenates_in_order() {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .merge(&[upload("a.pdf", 3), upload("b.pdf", 3)])
        .await
        .unwrap();

    assert!(outcome.artifact.name.starts_with("merged_"));
    assert!(outcome.artifact.name.ends_with(".pdf"));
    assert_eq!(
        outcome.artifact.download_url,
        format!("/api/download/{}", outcome.artifact.name)
    );
    assert_eq!(outcome.merged_count, 2);
    assert_eq!(outcome.original_filenames, vec!["a.pdf", "b.pdf"]);
    assert_eq!(page_count_of(&outcome.artifact.path), 6);
    assert!(h.temp_is_empty());

    let args = &h.tool.calls()[0];
    assert_eq!(args[0], "merge");
    assert!(args[2].ends_with("0_a.pdf"));
    assert!(args[3].ends_with("1_b.pdf"));
}

#[tokio::test]
async fn test_merge_skips_invalid_inputs() {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .merge(&[
            upload("a.pdf", 1),
            UploadedFile::new("notes.txt", b"hello".to_vec()),
            upload("b.pdf", 2),
        ])
        .await
        .unwrap();
    assert_eq!(outcome.merged_count, 2);
    assert_eq!(page_count_of(&outcome.artifact.path), 3);
}

#[tokio::test]
async fn test_split_direct() {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .split(&upload("report.pdf", 7), &SplitSelection::All)
        .await
        .unwrap();

    assert_eq!(outcome.strategy, SplitStrategy::Direct);
    assert_eq!(outcome.count, 7);
    assert_eq!(outcome.page_count, Some(7));
    assert_eq!(page_numbers(&outcome), (1..=7).collect::<Vec<_>>());
    for file in &outcome.files {
        assert_eq!(page_count_of(&file.artifact.path), 1);
    }
    assert!(outcome.files[0].artifact.name.ends_with("_report_page_1.pdf"));

    let bundle = outcome.bundle.as_ref().unwrap();
    assert!(bundle.name.starts_with("split_"));
    assert!(bundle.path.is_file());
    assert!(h.temp_is_empty());
    assert_eq!(h.tool.count("split"), 1);
}

#[tokio::test]
async fn test_split_explicit_range() {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .split(
            &upload("report.pdf", 10),
            &SplitSelection::parse(Some("7, 1-3,9")).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.strategy, SplitStrategy::Direct);
    assert_eq!(page_numbers(&outcome), vec![1, 7, 9]);
    assert_eq!(page_count_of(&outcome.files[0].artifact.path), 3);
}

#[tokio::test]
async fn test_split_pages_per_file() {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .split(&upload("report.pdf", 10), &SplitSelection::PagesPerFile(4))
        .await
        .unwrap();

    assert_eq!(page_numbers(&outcome), vec![1, 5, 9]);
    let sizes: Vec<u32> = outcome
        .files
        .iter()
        .map(|f| page_count_of(&f.artifact.path))
        .collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[tokio::test]
async fn test_split_single_page_has_no_bundle() {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .split(&upload("one.pdf", 5), &SplitSelection::Range("3".to_string()))
        .await
        .unwrap();
    assert_eq!(page_numbers(&outcome), vec![3]);
    assert!(outcome.bundle.is_none());
}

#[tokio::test]
async fn test_split_out_of_bounds_range() {
    let h = Harness::new(Fault::None);

    let err = h
        .executor
        .split(&upload("a.pdf", 3), &SplitSelection::Range("2-5".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PageOutOfBounds { page: 5, total: 3 }));
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_split_large_document_is_batched() {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .split(&upload("big.pdf", 250), &SplitSelection::All)
        .await
        .unwrap();

    assert_eq!(
        outcome.strategy,
        SplitStrategy::Batched {
            batches: 5,
            failed: 0
        }
    );
    assert_eq!(page_numbers(&outcome), (1..=250).collect::<Vec<_>>());

    let names: BTreeSet<&str> = outcome
        .files
        .iter()
        .map(|f| pdf_workbench::workspace::store::display_name(&f.artifact.name))
        .collect();
    assert_eq!(names.len(), 250);
    assert!(names.contains("big_page_51.pdf"));
    assert!(names.contains("big_page_250.pdf"));

    // Each window is split with window-local ranges
    for args in h.tool.calls().iter().filter(|a| a[0] == "split") {
        assert!(args[1].contains("batch_"));
        assert!(args[3].starts_with("1,2,"));
    }
    assert!(h.temp_is_empty());
}

#[rstest]
#[case(50)]
#[case(30)]
#[case(7)]
#[tokio::test]
async fn test_batched_numbering_independent_of_batch_size(#[case] batch_size: u32) {
    let policy = SplitPolicy {
        large_document_threshold: 100,
        batch_size,
        ..SplitPolicy::default()
    };
    let h = Harness::with_policy(Fault::None, policy);

    let outcome = h
        .executor
        .split(&upload("doc.pdf", 120), &SplitSelection::All)
        .await
        .unwrap();

    assert!(matches!(outcome.strategy, SplitStrategy::Batched { failed: 0, .. }));
    assert_eq!(page_numbers(&outcome), (1..=120).collect::<Vec<_>>());
    assert_eq!(h.tool.count("split"), (120 + batch_size as usize - 1) / batch_size as usize);
}

#[tokio::test]
async fn test_long_range_expression_is_batched() {
    let policy = SplitPolicy {
        max_range_arg_len: 40,
        ..SplitPolicy::default()
    };
    let h = Harness::with_policy(Fault::None, policy);

    let outcome = h
        .executor
        .split(&upload("doc.pdf", 60), &SplitSelection::All)
        .await
        .unwrap();
    assert!(matches!(outcome.strategy, SplitStrategy::Batched { batches: 2, .. }));
    assert_eq!(page_numbers(&outcome), (1..=60).collect::<Vec<_>>());
}

#[rstest]
#[case(Fault::SplitFails, Some(4))]
#[case(Fault::SplitGarbage, Some(4))]
#[case(Fault::InfoFails, None)]
#[tokio::test]
async fn test_split_falls_back_to_library(#[case] fault: Fault, #[case] page_count: Option<u32>) {
    let h = Harness::new(fault);

    let outcome = h
        .executor
        .split(&upload("scan.pdf", 4), &SplitSelection::All)
        .await
        .unwrap();

    assert_eq!(outcome.strategy, SplitStrategy::Fallback);
    assert_eq!(outcome.page_count, page_count);
    assert_eq!(page_numbers(&outcome), vec![1, 2, 3, 4]);
    for file in &outcome.files {
        assert_eq!(page_count_of(&file.artifact.path), 1);
    }
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_fallback_covers_whole_document() {
    let h = Harness::new(Fault::SplitFails);

    let outcome = h
        .executor
        .split(&upload("scan.pdf", 5), &SplitSelection::Range("2".to_string()))
        .await
        .unwrap();
    assert_eq!(outcome.strategy, SplitStrategy::Fallback);
    assert_eq!(outcome.count, 5);
}

#[tokio::test]
async fn test_relative_data_root_keeps_explicit_range() {
    let h = Harness::relative(Fault::None);
    assert!(h.executor.workspaces().root().is_absolute());

    let outcome = h
        .executor
        .split(&upload("doc.pdf", 5), &SplitSelection::Range("2".to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.strategy, SplitStrategy::Direct);
    assert_eq!(outcome.count, 1);
    assert_eq!(page_numbers(&outcome), vec![2]);
    assert!(outcome.bundle.is_none());
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_failed_batch_is_skipped() {
    let h = Harness::new(Fault::SplitFailsOnBatch(2));

    let outcome = h
        .executor
        .split(&upload("big.pdf", 250), &SplitSelection::All)
        .await
        .unwrap();

    assert_eq!(
        outcome.strategy,
        SplitStrategy::Batched {
            batches: 5,
            failed: 1
        }
    );
    let expected: Vec<u32> = (1..=50).chain(101..=250).collect();
    assert_eq!(page_numbers(&outcome), expected);
    assert_eq!(outcome.count, 200);
    assert_eq!(h.tool.count("split"), 5);
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_every_batch_failing_falls_back() {
    let h = Harness::new(Fault::SplitFails);

    let outcome = h
        .executor
        .split(&upload("big.pdf", 250), &SplitSelection::All)
        .await
        .unwrap();

    assert_eq!(outcome.strategy, SplitStrategy::Fallback);
    assert_eq!(outcome.page_count, Some(250));
    assert_eq!(page_numbers(&outcome), (1..=250).collect::<Vec<_>>());
    assert_eq!(h.tool.count("split"), 5);
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_library_extractor_as_primary() {
    let dir = TempDir::new().unwrap();
    let tool = Arc::new(LibraryTool::new());
    let workspaces = WorkspaceManager::new(dir.path()).unwrap();
    let executor = OperationExecutor::with_extractors(
        workspaces,
        ToolInvoker::new(tool.clone()),
        SplitPolicy::default(),
        Arc::new(LibraryExtractor),
        Arc::new(LibraryExtractor),
    );

    let outcome = executor
        .split(&upload("doc.pdf", 6), &SplitSelection::Range("2-3,5".to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.strategy, SplitStrategy::Direct);
    assert_eq!(page_numbers(&outcome), vec![2, 5]);
    assert_eq!(page_count_of(&outcome.files[0].artifact.path), 2);
    assert_eq!(page_count_of(&outcome.files[1].artifact.path), 1);
    assert!(outcome.bundle.is_some());
    assert_eq!(tool.count("info"), 1);
    assert_eq!(tool.count("split"), 0);
}

#[rstest]
#[case(90)]
#[case(180)]
#[case(270)]
#[tokio::test]
async fn test_rotate_accepted(#[case] degrees: i32) {
    let h = Harness::new(Fault::None);

    let outcome = h
        .executor
        .rotate(&upload("a.pdf", 2), degrees)
        .await
        .unwrap();
    assert!(outcome.artifact.name.starts_with("rotated_"));
    assert_eq!(outcome.degrees, Some(degrees));
    assert_eq!(h.tool.calls()[0][3], degrees.to_string());
}

#[tokio::test]
async fn test_rotate_rejected_without_tool_call() {
    let h = Harness::new(Fault::None);

    let err = h.executor.rotate(&upload("a.pdf", 2), 45).await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));
    assert!(h.tool.calls().is_empty());
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_metacharacters_never_reach_tool() {
    let h = Harness::new(Fault::None);

    let err = h
        .executor
        .protect(&upload("a.pdf", 1), "pass;word")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));

    let err = h
        .executor
        .watermark(&upload("a.pdf", 1), "$(reboot)", 0.5)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));

    assert!(h.tool.calls().is_empty());
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_tool_failure_reports_stderr() {
    let h = Harness::new(Fault::AllFail);

    let err = h
        .executor
        .compress(&upload("a.pdf", 1), CompressionQuality::High)
        .await
        .unwrap_err();
    match err {
        Error::ToolExecution { exit_code, stderr } => {
            assert_eq!(exit_code, 3);
            assert_eq!(stderr, "Error loading PDF file");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(h.temp_is_empty());
    assert_eq!(
        std::fs::read_dir(h.executor.workspaces().processed_store_dir())
            .unwrap()
            .count(),
        0
    );
}

#[tokio::test]
async fn test_transforms_produce_tagged_artifacts() {
    let h = Harness::new(Fault::None);
    let file = upload("a.pdf", 2);

    let compressed = h
        .executor
        .compress(&file, CompressionQuality::Low)
        .await
        .unwrap();
    assert!(compressed.artifact.name.starts_with("compressed_"));
    assert_eq!(compressed.quality, Some(CompressionQuality::Low));
    assert_eq!(compressed.compression_rate.as_deref(), Some("0.0%"));
    assert_eq!(compressed.compressed_size, Some(file.data.len() as u64));

    let watermarked = h
        .executor
        .watermark(&file, "DRAFT", 2.0)
        .await
        .unwrap();
    assert!(watermarked.artifact.name.starts_with("watermarked_"));
    assert_eq!(watermarked.watermark_opacity, Some(0.5));

    let protected = h.executor.protect(&file, "s3cret").await.unwrap();
    assert!(protected.artifact.name.starts_with("protected_"));
    let unlocked = h.executor.unlock(&file, "s3cret").await.unwrap();
    assert!(unlocked.artifact.name.starts_with("unlocked_"));

    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_info_reports_tool_metadata() {
    let h = Harness::new(Fault::None);

    let outcome = h.executor.info(&upload("deck.pdf", 9)).await.unwrap();
    assert_eq!(outcome.info.page_count, 9);
    assert_eq!(outcome.info.producer.as_deref(), Some("LibraryTool"));
    assert_eq!(outcome.info.file_name.as_deref(), Some("deck.pdf"));
    assert!(h.temp_is_empty());
}

#[tokio::test]
async fn test_download_with_cleanup() {
    let h = Harness::new(Fault::None);
    let store = h.executor.workspaces().store();

    let outcome = h
        .executor
        .split(&upload("report.pdf", 2), &SplitSelection::All)
        .await
        .unwrap();
    let name = outcome.files[1].artifact.name.clone();

    let fetched = store.fetch(&name, false).unwrap();
    assert_eq!(fetched.download_name, "report_page_2.pdf");

    let fetched = store.fetch(&name, true).unwrap();
    assert!(fetched.data.starts_with(b"%PDF"));
    assert!(matches!(
        store.fetch(&name, false),
        Err(Error::ArtifactNotFound { .. })
    ));

    assert!(matches!(
        store.fetch("../../etc/passwd", false),
        Err(Error::ArtifactNotFound { .. })
    ));
}

#[tokio::test]
async fn test_sweep_removes_old_artifacts() {
    let h = Harness::new(Fault::None);
    h.executor
        .merge(&[upload("a.pdf", 1), upload("b.pdf", 1)])
        .await
        .unwrap();

    let workspaces = h.executor.workspaces();
    let kept = workspaces.sweep_older_than(Duration::from_secs(3600));
    assert_eq!(kept.files_removed, 0);

    let report = workspaces.sweep_older_than(Duration::ZERO);
    assert_eq!(report.files_removed, 1);
    assert_eq!(
        std::fs::read_dir(workspaces.processed_store_dir())
            .unwrap()
            .count(),
        0
    );
}

#[tokio::test]
async fn test_concurrent_operations_use_separate_workspaces() {
    let h = Harness::new(Fault::None);
    let file = upload("a.pdf", 3);

    let (a, b) = tokio::join!(
        h.executor.split(&file, &SplitSelection::All),
        h.executor.split(&file, &SplitSelection::All)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let names: BTreeSet<String> = a
        .files
        .iter()
        .chain(b.files.iter())
        .map(|f| f.artifact.name.clone())
        .collect();
    assert_eq!(names.len(), 6);
    assert!(h.temp_is_empty());
}
