// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants and stage weights

use frame_recorder::constants::{DEFAULT_STAGE_WEIGHTS, FRAME_INDEX_WIDTH};
use frame_recorder::pipelines::frame::frame_destination;
use frame_recorder::pipelines::{Stage, StageWeights};
use std::path::Path;

#[test]
fn test_stage_order_matches_weight_vector() {
    // Weight vector index follows pipeline order
    for (position, stage) in Stage::ALL.iter().enumerate() {
        assert_eq!(stage.index(), position);
    }
    assert_eq!(Stage::DOWNSTREAM[0], Stage::Convert);
    assert_eq!(Stage::DOWNSTREAM[3], Stage::Persist);
}

#[test]
fn test_stage_display_names() {
    let names: Vec<String> = Stage::ALL.iter().map(|s| s.to_string()).collect();
    assert_eq!(
        names,
        vec!["capture", "convert", "extract", "encode", "persist"]
    );
}

#[test]
fn test_redistribution_conserves_weight() {
    let mut weights = StageWeights::new(DEFAULT_STAGE_WEIGHTS);
    let total = weights.downstream_total();
    let capture = weights.get(Stage::Capture);

    weights.redistribute(Stage::Convert, &[Stage::Extract, Stage::Encode, Stage::Persist]);
    assert_eq!(weights.downstream_total(), total);
    weights.redistribute(Stage::Extract, &[Stage::Persist]);
    assert_eq!(weights.downstream_total(), total);
    assert_eq!(weights.get(Stage::Capture), capture);
}

#[test]
fn test_frame_names_sort_in_capture_order() {
    // Zero padding keeps lexical order equal to capture order
    let dir = Path::new("chunk");
    let mut names: Vec<String> = [10u64, 2, 999, 0]
        .iter()
        .map(|i| frame_destination(dir, *i, "png").display().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["chunk/0000.png", "chunk/0002.png", "chunk/0010.png", "chunk/0999.png"]
    );
    assert_eq!(FRAME_INDEX_WIDTH, 4);
}
