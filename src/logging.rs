//! ログ初期化
//!
//! `RUST_LOG` があればそれに従い、なければ `--verbose` で debug、通常は warn。
//! 出力は標準エラー（標準出力は結果表示に使う）。

use tracing_subscriber::EnvFilter;

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "apple_scan_rust=debug,apple_scan_common=debug,info"
    } else {
        "warn"
    }
}

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}
