use anyhow::{anyhow, bail, Context, Result};
use apple_scan_common::{AnalyzeResponse, OxidationLevel, ScanHistoryItem, Severity};
use apple_scan_rust::api::{AnalyzeApi, ApiClient, StaticToken, TokenSource};
use apple_scan_rust::auth::{AuthState, AuthStore, Credentials, ProviderSignIn, SupabaseAuth};
use apple_scan_rust::cli::{AuthAction, Cli, Commands, HistoryAction};
use apple_scan_rust::config::{Config, HistoryBackend};
use apple_scan_rust::history::{HistoryStore, LocalScanTable, PostgrestScanTable, ScanTable};
use apple_scan_rust::photo::{FilePhotoSource, GalleryPhotoSource, PhotoSource, Selection};
use apple_scan_rust::scan::{ScanFlow, ScanPhase};
use apple_scan_rust::logging;
use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// 認証・API・履歴をまとめたもの
struct App {
    config: Config,
    provider: Arc<SupabaseAuth>,
    auth: Arc<AuthStore>,
    api: Arc<ApiClient>,
    history: Arc<HistoryStore>,
}

impl App {
    fn build(config: Config) -> Result<Self> {
        let provider = Arc::new(
            SupabaseAuth::from_config(&config)?
                .with_url_handler(|url| eprintln!("ブラウザで次のURLを開いてください:\n  {}\n", url)),
        );
        let auth = Arc::new(AuthStore::new(provider.clone()));
        let api = Arc::new(ApiClient::from_config(&config, auth.clone())?);

        let table: Arc<dyn ScanTable> = match config.history_backend {
            HistoryBackend::Remote => Arc::new(PostgrestScanTable::from_config(&config)?),
            HistoryBackend::Local => Arc::new(LocalScanTable::new(Config::config_dir()?)),
        };
        let history = HistoryStore::new(table, auth.clone());

        Ok(Self { config, provider, auth, api, history })
    }

    /// サインイン必須のコマンド用
    async fn require_sign_in(&self) -> Result<()> {
        if !self.auth.initialize().await.is_authenticated() {
            bail!(apple_scan_rust::error::AppleScanError::Unauthenticated);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = Config::load().context("設定の読み込みに失敗しました")?;

    match cli.command {
        Commands::Health => run_health(config).await?,

        Commands::Scan { image, gallery, index, variety, yes } => {
            let source: Box<dyn PhotoSource> = match (image, gallery) {
                (Some(path), _) => Box::new(FilePhotoSource::new(path)),
                (None, Some(folder)) => {
                    let selection = index.map(Selection::Index).unwrap_or(Selection::Interactive);
                    Box::new(GalleryPhotoSource::new(folder).with_selection(selection))
                }
                (None, None) => bail!("画像ファイルか --gallery <フォルダ> を指定してください"),
            };

            let app = App::build(config)?;
            app.require_sign_in().await?;
            run_scan(&app, source.as_ref(), variety, yes).await?;
        }

        Commands::History { action } => {
            let action = action.unwrap_or(HistoryAction::List { limit: 20 });
            let app = App::build(config)?;
            if action.requires_sign_in() {
                app.require_sign_in().await?;
            } else {
                // 未サインインなら履歴ストアが空を返す
                app.auth.initialize().await;
            }
            run_history(&app, action).await?;
        }

        Commands::Auth { action } => {
            let app = App::build(config)?;
            run_auth(&app, action).await?;
        }

        Commands::Config {
            set_api_url,
            set_supabase_url,
            set_anon_key,
            set_variety,
            set_environment,
            set_history_backend,
            show,
        } => {
            let mut config = config;
            let mut changed = false;

            if let Some(url) = set_api_url {
                config.set_api_url(&url)?;
                changed = true;
            }
            if let Some(url) = set_supabase_url {
                config.set_supabase_url(&url)?;
                changed = true;
            }
            if let Some(key) = set_anon_key {
                config.supabase_anon_key = Some(key);
                changed = true;
            }
            if let Some(variety) = set_variety {
                config.default_variety = variety;
                changed = true;
            }
            if let Some(environment) = set_environment {
                config.environment = environment;
                changed = true;
            }
            if let Some(backend) = set_history_backend {
                config.history_backend = backend;
                changed = true;
            }

            if changed {
                config.save()?;
                println!("✔ 設定を保存しました: {}", Config::config_path()?.display());
            }

            if show || !changed {
                println!("設定:");
                println!("  推定API: {}", config.api_base_url);
                println!("  Supabase: {}", config.supabase_url.as_deref().unwrap_or("未設定"));
                println!("  anonキー: {}", if config.supabase_anon_key.is_some() { "設定済み" } else { "未設定" });
                println!("  タイムアウト: {}秒", config.timeout_seconds);
                println!("  アップロード上限: {}KB / 最大{}px / 品質{}", config.max_upload_kb, config.max_dimension, config.jpeg_quality);
                println!("  既定の品種: {}", config.default_variety);
                println!("  OAuth環境: {:?}", config.environment);
                println!("  履歴の保存先: {:?}", config.history_backend);
            }
        }
    }

    Ok(())
}

async fn run_health(config: Config) -> Result<()> {
    // 接続確認だけなので未設定の認証は必須にしない
    let tokens: Arc<dyn TokenSource> = match App::build(config.clone()) {
        Ok(app) => {
            app.auth.initialize().await;
            app.auth.clone()
        }
        Err(_) => Arc::new(StaticToken(None)),
    };
    let client = ApiClient::from_config(&config, tokens)?;

    println!("🔍 {} に接続中...", client.base_url());
    let health = client.health_check().await?;
    println!("✔ status: {}", health.status);
    if health.models_loaded.is_empty() {
        println!("  モデル: なし");
    } else {
        println!("  モデル: {}", health.models_loaded.join(", "));
    }
    for (key, value) in &health.metadata {
        println!("  {}: {}", key, value);
    }
    Ok(())
}

async fn run_scan(
    app: &App,
    source: &dyn PhotoSource,
    variety: Option<apple_scan_common::AppleVariety>,
    yes: bool,
) -> Result<()> {
    let mut flow = ScanFlow::new(app.auth.clone(), app.api.clone(), app.history.clone())
        .with_config(&app.config);
    if let Some(variety) = variety {
        flow.set_variety(variety);
    }

    println!("🍎 apple-scan - 断面解析\n");

    match flow.select_photo(source).await? {
        ScanPhase::PhotoPending { photo } => {
            let size = match photo.dimensions() {
                Ok((w, h)) => format!("{}x{}, ", w, h),
                Err(_) => String::new(),
            };
            println!("写真: {} ({}{} KB)", photo.source_uri, size, photo.len() / 1024);
            println!("品種: {}", flow.variety().display_name());
        }
        ScanPhase::Idle { error: Some(e) } => return Err(anyhow!("{}", e)),
        _ => {
            println!("キャンセルしました");
            return Ok(());
        }
    }

    if !yes {
        let proceed = dialoguer::Confirm::new()
            .with_prompt("この写真を解析しますか？")
            .default(true)
            .interact()
            .context("確認入力に失敗しました")?;
        if !proceed {
            flow.cancel();
            println!("キャンセルしました");
            return Ok(());
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("解析中...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let phase = flow.confirm().await;
    spinner.finish_and_clear();

    match phase? {
        ScanPhase::Result { response, saved, save_error } => {
            print_result(&response);
            match (saved, save_error) {
                (Some(item), _) => println!("\n✔ 履歴に保存しました (id: {})", item.id),
                (None, Some(e)) => println!("\n⚠ 履歴に保存できませんでした: {}", e),
                (None, None) => {}
            }
            Ok(())
        }
        ScanPhase::Idle { error: Some(e) } => {
            if e.is_retryable() {
                eprintln!("もう一度お試しください");
            }
            Err(anyhow!("{}", e))
        }
        other => bail!("予期しない状態: {}", other.name()),
    }
}

fn print_result(response: &AnalyzeResponse) {
    let p = &response.prediction;
    println!("\n結果:");
    println!("  経過日数: {:.1} 日", p.days_since_cut);
    println!(
        "  信頼区間: {:.1} 〜 {:.1} 日",
        p.confidence_interval.lower, p.confidence_interval.upper
    );
    println!("  酸化: {} ({})", p.oxidation_level, severity_label(p.oxidation_level));
    println!("  所見: {}", p.interpretation);

    let info = &response.model_info;
    print!("  モデル: {}", info.variety_used.display_name());
    if let Some(mae) = info.validation_mae {
        print!(" / MAE {:.2}", mae);
    }
    if let Some(samples) = info.training_samples {
        print!(" / {}枚で学習", samples);
    }
    println!();
}

fn severity_label(level: OxidationLevel) -> &'static str {
    match level.severity() {
        Severity::Fresh => "🟢 新鮮",
        Severity::Slight => "🟡 わずか",
        Severity::Moderate => "🟠 中程度",
        Severity::Severe => "🔴 強い",
    }
}

async fn run_history(app: &App, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { limit } => {
            let items = app.history.load().await?;
            if items.is_empty() {
                println!("履歴はありません");
                return Ok(());
            }
            for item in items.iter().take(limit) {
                print_history_item(item);
            }
            if items.len() > limit {
                println!("... ほか{}件", items.len() - limit);
            }
        }
        HistoryAction::Stats => {
            app.history.load().await?;
            let stats = app.history.stats();
            println!("スキャン数: {}", stats.total_scans);
            println!("最終スキャン: {}", stats.last_scan_relative(Utc::now()));
            println!("最多品種: {}", stats.most_scanned_display());
        }
        HistoryAction::Delete { id } => {
            app.history.delete(&id).await?;
            println!("✔ 削除しました: {}", id);
        }
        HistoryAction::Clear { yes } => {
            if !yes {
                let proceed = dialoguer::Confirm::new()
                    .with_prompt("すべての履歴を削除しますか？")
                    .default(false)
                    .interact()
                    .context("確認入力に失敗しました")?;
                if !proceed {
                    return Ok(());
                }
            }
            app.history.clear_all().await?;
            println!("✔ 履歴を削除しました");
        }
    }
    Ok(())
}

fn print_history_item(item: &ScanHistoryItem) {
    println!(
        "{}  {:>5.1}日  {:<8} {:<12} {}",
        item.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        item.days_since_cut,
        item.variety.display_name(),
        item.oxidation_level.as_str(),
        item.id,
    );
}

async fn run_auth(app: &App, action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Signin { email, provider, environment } => {
            if let Some(provider) = provider {
                let environment = environment.unwrap_or(app.config.environment);
                match app.auth.sign_in_with_provider(provider, environment).await? {
                    ProviderSignIn::Completed(session) => {
                        println!("✔ サインインしました: {}", session.display_name());
                    }
                    ProviderSignIn::Pending { authorize_url } => {
                        println!("ブラウザで次のURLを開いてサインインしてください:\n  {}\n", authorize_url);
                        println!("リダイレクト先のURLを受け取ったら次を実行:");
                        println!("  apple-scan auth callback '<URL>'");
                    }
                }
                return Ok(());
            }

            let email = match email {
                Some(email) => email,
                None => dialoguer::Input::<String>::new()
                    .with_prompt("メールアドレス")
                    .interact_text()?,
            };
            let password = dialoguer::Password::new().with_prompt("パスワード").interact()?;
            let session = app.auth.sign_in(&Credentials::new(email, password)).await?;
            println!("✔ サインインしました: {}", session.display_name());
        }
        AuthAction::Signup { email } => {
            let email = match email {
                Some(email) => email,
                None => dialoguer::Input::<String>::new()
                    .with_prompt("メールアドレス")
                    .interact_text()?,
            };
            let password = dialoguer::Password::new().with_prompt("パスワード").interact()?;
            let confirm = dialoguer::Password::new()
                .with_prompt("パスワード（確認）")
                .interact()?;
            let session = app
                .auth
                .sign_up(&Credentials::new(email, password), &confirm)
                .await?;
            println!("✔ 登録してサインインしました: {}", session.display_name());
        }
        AuthAction::Signout => {
            app.auth.sign_out().await?;
            println!("✔ サインアウトしました");
        }
        AuthAction::Status => match app.auth.initialize().await {
            AuthState::Authenticated(session) => {
                println!("サインイン中: {}", session.display_name());
                if let Some(expires_at) = session.expires_at {
                    println!("  有効期限: {}", expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
                }
            }
            _ => {
                println!("サインインしていません");
                if let Some(error) = app.auth.last_error() {
                    println!("  直近のエラー: {}", error);
                }
            }
        },
        AuthAction::Callback { url } => {
            app.provider.record_redirect_callback(&url)?;
            match app.auth.initialize().await {
                AuthState::Authenticated(session) => {
                    println!("✔ サインインしました: {}", session.display_name());
                }
                _ => bail!(
                    "サインインを完了できませんでした{}",
                    app.auth.last_error().map(|e| format!(": {}", e)).unwrap_or_default()
                ),
            }
        }
    }
    Ok(())
}
