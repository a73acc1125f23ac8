//! Example: Estimate the size of an offline tile download.
//!
//! Usage: cargo run --example estimate_area -- <min_lat,min_lon,max_lat,max_lon> <min_zoom> <max_zoom>

use std::env;
use std::time::Instant;
use tilegrab_tiles::{tile_range_for_bbox, BoundingBox, PreflightEstimator};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        eprintln!("Usage: {} <min_lat,min_lon,max_lat,max_lon> <min_zoom> <max_zoom>", args[0]);
        eprintln!("Example: {} 47.5,-122.5,47.7,-122.2 10 16", args[0]);
        std::process::exit(1);
    }

    let bbox: BoundingBox = args[1].parse().expect("Invalid bounding box");
    let min_zoom: u8 = args[2].parse().expect("Invalid min zoom");
    let max_zoom: u8 = args[3].parse().expect("Invalid max zoom");
    let zooms: Vec<u8> = (min_zoom..=max_zoom).collect();

    println!("Area: {}", bbox);

    let start = Instant::now();
    let preflight = match PreflightEstimator::default().estimate(&bbox, &zooms) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    println!("{}", preflight);
    println!("\nEstimated in {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);

    // Show the tile index ranges as well
    println!("\nTile ranges:");
    for zoom in zooms {
        let range = tile_range_for_bbox(&bbox, zoom).expect("zoom already validated");
        println!(
            "  z{:>2}: x {}..={}, y {}..={}",
            zoom, range.x_min, range.x_max, range.y_min, range.y_max
        );
    }
}
