use crate::auth::{Environment, OAuthProvider};
use crate::config::HistoryBackend;
use apple_scan_common::AppleVariety;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "apple-scan")]
#[command(about = "りんご断面写真から切ってからの経過日数を推定", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 推定APIの状態を確認
    Health,

    /// 写真を解析して履歴に保存
    Scan {
        /// 画像ファイル（カメラ撮影の代わり）
        #[arg(conflicts_with = "gallery")]
        image: Option<PathBuf>,

        /// フォルダから選択（ギャラリー）
        #[arg(short, long)]
        gallery: Option<PathBuf>,

        /// ギャラリーの何枚目を使うか（省略時は対話選択）
        #[arg(long, requires = "gallery")]
        index: Option<usize>,

        /// 品種 (combined/gala/smith/red_delicious)
        #[arg(long)]
        variety: Option<AppleVariety>,

        /// 確認せずに解析
        #[arg(short, long)]
        yes: bool,
    },

    /// スキャン履歴
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },

    /// サインイン/サインアウト
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// 設定を表示/編集
    Config {
        /// 推定APIのURLを設定
        #[arg(long)]
        set_api_url: Option<String>,

        /// SupabaseのURLを設定
        #[arg(long)]
        set_supabase_url: Option<String>,

        /// Supabaseのanonキーを設定
        #[arg(long)]
        set_anon_key: Option<String>,

        /// 既定の品種を設定
        #[arg(long)]
        set_variety: Option<AppleVariety>,

        /// OAuthの実行環境 (native/web)
        #[arg(long)]
        set_environment: Option<Environment>,

        /// 履歴の保存先 (remote/local)
        #[arg(long)]
        set_history_backend: Option<HistoryBackend>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}

#[derive(Subcommand)]
pub enum HistoryAction {
    /// 一覧（新しい順）
    List {
        /// 表示件数
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// 件数・最終スキャン・最多品種
    Stats,
    /// 1件削除
    Delete {
        #[arg(required = true)]
        id: String,
    },
    /// 全件削除
    Clear {
        /// 確認しない
        #[arg(short, long)]
        yes: bool,
    },
}

impl HistoryAction {
    /// 変更系だけサインイン必須。閲覧は未サインインなら空の履歴を表示する
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, HistoryAction::Delete { .. } | HistoryAction::Clear { .. })
    }
}

#[derive(Subcommand)]
pub enum AuthAction {
    /// メール/パスワード、またはOAuthでサインイン
    Signin {
        #[arg(short, long, conflicts_with = "provider")]
        email: Option<String>,

        /// OAuthプロバイダ (google/apple)
        #[arg(short, long)]
        provider: Option<OAuthProvider>,

        /// 実行環境を上書き (native/web)
        #[arg(long)]
        environment: Option<Environment>,
    },
    /// 新規登録
    Signup {
        #[arg(short, long)]
        email: Option<String>,
    },
    /// サインアウト
    Signout,
    /// サインイン状態を表示
    Status,
    /// OAuthリダイレクトのコールバックURLを受け取ってサインインを完了
    Callback {
        #[arg(required = true)]
        url: String,
    },
}
