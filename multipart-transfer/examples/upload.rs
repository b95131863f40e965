/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */
use std::error::Error;
use std::path::PathBuf;
use std::time;

use aws_sdk_s3::error::DisplayErrorContext;
use clap::Parser;
use multipart_transfer::io::ByteSource;
use multipart_transfer::state::UploadState;
use multipart_transfer::types::{ConcurrencySetting, PartSize};
use multipart_transfer::workflow::Workflow;
use tracing::{debug_span, Instrument};

type BoxError = Box<dyn Error + Send + Sync>;

const ONE_MEGABYTE: u64 = 1000 * 1000;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "upload")]
#[command(about = "Uploads a local file to S3, resuming from a saved state when one exists.")]
pub struct Args {
    /// Local file to upload
    #[arg(required = true)]
    source: PathBuf,

    /// Destination bucket
    #[arg(long, required = true)]
    bucket: String,

    /// Destination key
    #[arg(long, required = true)]
    key: String,

    /// Number of in-flight part uploads
    #[arg(long)]
    concurrency: Option<usize>,

    /// Part size to use
    #[arg(long, default_value_t = 8388608)]
    part_size: u64,

    /// Where the upload state is saved when an attempt fails
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Resume an existing upload by its upload id
    #[arg(long)]
    resume: Option<String>,
}

fn load_state(path: Option<&PathBuf>) -> Result<Option<UploadState>, BoxError> {
    match path {
        Some(path) if path.exists() => {
            let contents = std::fs::read(path)?;
            Ok(Some(serde_json::from_slice(&contents)?))
        }
        _ => Ok(None),
    }
}

async fn do_upload(args: Args) -> Result<(), BoxError> {
    let concurrency = args
        .concurrency
        .map(ConcurrencySetting::Explicit)
        .unwrap_or_default();
    let tm_config = multipart_transfer::from_env()
        .concurrency(concurrency)
        .part_size(PartSize::Target(args.part_size))
        .load()
        .await?;
    let tm = multipart_transfer::Client::new(tm_config);

    let mut builder = tm
        .upload()
        .workflow(Workflow::object_storage())
        .body(ByteSource::from_path(&args.source)?);
    builder = match (load_state(args.state_file.as_ref())?, &args.resume) {
        (Some(state), _) => builder.state(state),
        (None, Some(upload_id)) => builder
            .identifier("Bucket", &args.bucket)
            .identifier("Key", &args.key)
            .resume_session(upload_id),
        (None, None) => builder
            .identifier("Bucket", &args.bucket)
            .identifier("Key", &args.key),
    };
    let handle = builder.initiate()?;

    let start = time::Instant::now();
    let result = handle
        .upload()
        .instrument(debug_span!("upload-file"))
        .await;
    let elapsed = start.elapsed();

    match result {
        Ok(output) => {
            let size = std::fs::metadata(&args.source)?.len();
            let throughput_mbps = (size as f64 / ONE_MEGABYTE as f64) / elapsed.as_secs_f64();
            println!(
                "uploaded {size} bytes in {} part(s) in {elapsed:?} ({throughput_mbps:.2} MB/s)",
                output.part_count()
            );
            if let Some(path) = &args.state_file {
                let _ = std::fs::remove_file(path);
            }
            Ok(())
        }
        Err(err) => {
            if let Some(failure) = err.aggregate() {
                eprintln!(
                    "parts {:?} failed, {} part(s) uploaded",
                    failure.failed_part_numbers(),
                    failure.state().uploaded_parts().len()
                );
                if let Some(path) = &args.state_file {
                    std::fs::write(path, serde_json::to_vec_pretty(failure.state())?)?;
                    eprintln!("upload state saved to {}", path.display());
                }
            }
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_ids(true)
        .init();

    if let Err(err) = do_upload(args).await {
        eprintln!("{}", DisplayErrorContext(err.as_ref()));
        std::process::exit(1);
    }
    Ok(())
}
