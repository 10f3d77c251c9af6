//! Drives traffic at a running server and prints what the counters report back.
use anyhow::{Context, Result, ensure};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:1111")]
    base_url: String,

    #[arg(long, default_value_t = 1)]
    article: i64,

    #[arg(long, default_value_t = 100)]
    views: u64,

    #[arg(long, default_value = "tester")]
    user: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = Client::new();
    let base = args.base_url.trim_end_matches('/');

    let before = views_of(&client, base, args.article).await?;
    println!("Views before: {before}");

    let pb = ProgressBar::new(args.views);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    for _ in 0..args.views {
        let status = client
            .get(format!("{base}/articles/{}", args.article))
            .send()
            .await
            .context("Detail request failed")?
            .status();
        ensure!(status.is_success(), "Detail request returned {status}");

        pb.inc(1);
    }
    pb.finish_with_message("done");

    let after = views_of(&client, base, args.article).await?;
    println!("Views after: {after}");
    println!("Counted: {} of {}\n", after - before - 1, args.views);

    for round in 1..=2 {
        let outcome: Value = client
            .post(format!("{base}/articles/{}/like", args.article))
            .header("X-User-Id", &args.user)
            .send()
            .await
            .context("Like request failed")?
            .error_for_status()?
            .json()
            .await?;

        println!("Toggle {round}: {outcome}");
    }

    let likes: Value = client
        .get(format!("{base}/users/{}/likes", args.user))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    println!("Liked by {}: {likes}", args.user);

    Ok(())
}

/// Reading the detail page counts a view too.
async fn views_of(client: &Client, base: &str, article: i64) -> Result<i64> {
    let detail: Value = client
        .get(format!("{base}/articles/{article}"))
        .send()
        .await
        .context("Detail request failed")?
        .error_for_status()?
        .json()
        .await?;

    detail["viewsCount"]
        .as_i64()
        .context("Detail response has no viewsCount")
}
