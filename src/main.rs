use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use deutsch_anki::anki::AnkiConnect;
use deutsch_anki::cache::{self, DictionaryCache};
use deutsch_anki::server::{PhraseServer, PhraseStore};
use deutsch_anki::{Config, FlashcardMaker, Resolution, RunLog, TranslationResolver};

#[derive(Debug, Parser)]
#[command(name = "deutsch-anki")]
#[command(about = "把德语单词翻译成 Anki 卡片")]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 解析 Apple 词典的 Body.data 并写出缓存
    BuildCache {
        /// 缓存没有过期也重新生成
        #[arg(long)]
        force: bool,
    },

    /// 翻译一个词并打印结果
    Translate {
        word: String,

        /// 同时使用非精选和不精确的结果
        #[arg(long)]
        comprehensive: bool,
    },

    /// 为文件中的每一行生成卡片
    FromFile {
        path: PathBuf,

        /// 牌组名，默认使用配置中的牌组
        #[arg(long)]
        deck: Option<String>,

        /// 同时导出 CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// 不写回短语服务器
        #[arg(long)]
        no_post: bool,

        /// 写回时使用的用户，默认为配置中的第一个用户
        #[arg(long)]
        owner: Option<String>,
    },

    /// 从短语服务器取新短语，生成卡片并导入 Anki
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let log = Arc::new(RunLog::to_dir(&config.logging.dir)?);

    match cli.command {
        Command::BuildCache { force } => build_cache(&config, &log, force),
        Command::Translate {
            word,
            comprehensive,
        } => translate(&config, log, &word, comprehensive).await,
        Command::FromFile {
            path,
            deck,
            csv,
            no_post,
            owner,
        } => from_file(&config, log, &path, deck, csv, no_post, owner).await,
        Command::Sync => sync(&config, log).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let config = Config::from_path(path)?;
        println!("⚙️  已加载配置: {}", path.display());
        Ok(config)
    } else {
        println!("⚠️  未找到 {}，使用默认配置", path.display());
        Ok(Config::default())
    }
}

fn build_cache(config: &Config, log: &RunLog, force: bool) -> Result<()> {
    let cache_file = &config.dictionary.cache_file;
    let body_data = &config.dictionary.body_data;
    if !force && !cache::is_stale(cache_file, body_data) {
        println!("✅ 缓存已是最新: {}", cache_file.display());
        return Ok(());
    }

    log.section("生成词典缓存...");
    println!("📖 解析词典: {}", body_data.display());
    let dictionary = DictionaryCache::build_from_archive(body_data, log)?;
    dictionary.save(cache_file)?;
    println!("💾 已写出 {} 个词条到 {}", dictionary.len(), cache_file.display());
    Ok(())
}

fn load_dictionary(config: &Config, log: &RunLog) -> Result<Arc<DictionaryCache>> {
    let cache_file = &config.dictionary.cache_file;
    if cache_file.exists() {
        let dictionary = DictionaryCache::load(cache_file)?;
        log.line(format!("已加载词典缓存 ({} 个词条)", dictionary.len()));
        return Ok(Arc::new(dictionary));
    }
    if config.dictionary.body_data.exists() {
        println!("📖 词典缓存不存在，正在生成...");
        let dictionary = DictionaryCache::build_from_archive(&config.dictionary.body_data, log)?;
        dictionary.save(cache_file)?;
        return Ok(Arc::new(dictionary));
    }
    println!("⚠️  没有词典缓存，名词复数将显示为 ?");
    Ok(Arc::new(DictionaryCache::default()))
}

async fn translate(config: &Config, log: Arc<RunLog>, word: &str, comprehensive: bool) -> Result<()> {
    log.section(format!("翻译 '{}'...", word));
    let dictionary = load_dictionary(config, &log)?;
    let resolver = TranslationResolver::from_config(config, dictionary, log)?
        .comprehensive(comprehensive || config.processing.comprehensive);

    match resolver.resolve(word).await {
        Resolution::Resolved(candidates) => {
            println!("📝 找到 {} 条翻译", candidates.len());
            for candidate in candidates {
                println!("  {}", candidate);
            }
        }
        Resolution::NoMatch => println!("⚠️  没有找到 '{}' 的翻译", word),
        Resolution::UpstreamUnavailable => println!("⏳ 词典暂时不可用，请稍后再试"),
        Resolution::Failed(reason) => println!("❌ 翻译失败: {}", reason),
    }
    Ok(())
}

async fn make_flashcard_maker(
    config: &Config,
    dictionary: Arc<DictionaryCache>,
    log: Arc<RunLog>,
) -> Result<FlashcardMaker> {
    let resolver = TranslationResolver::from_config(config, dictionary, log.clone())?;
    let anki = AnkiConnect::connect(config).await?;
    Ok(FlashcardMaker::new(resolver, Box::new(anki), &config.anki, log))
}

async fn from_file(
    config: &Config,
    log: Arc<RunLog>,
    path: &Path,
    deck: Option<String>,
    csv: Option<PathBuf>,
    no_post: bool,
    owner: Option<String>,
) -> Result<()> {
    log.section(format!("从文件生成卡片: {}", path.display()));
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("无法读取 {}: {}", path.display(), e))?;
    let owner = owner.or_else(|| config.server.users.keys().next().cloned());

    let dictionary = load_dictionary(config, &log)?;
    let mut maker = make_flashcard_maker(config, dictionary, log.clone()).await?;
    println!("🔄 开始翻译 {} 行...", text.lines().count());
    let phrases = maker
        .phrases_from_lines(text.lines(), deck.as_deref(), owner.as_deref())
        .await;
    println!("📊 {} 个短语翻译完成，共 {} 张卡片", phrases.len(), maker.note_taker().note_count());

    if let Some(csv) = csv {
        let deck_name = deck.as_deref().unwrap_or(config.anki.default_deck.as_str());
        maker.note_taker().export_csv(deck_name, &csv)?;
        println!("✅ CSV 已生成：{}", csv.display());
    }

    maker.update_anki().await?;
    println!("✅ 已导入 Anki");

    if no_post {
        return Ok(());
    }
    match owner {
        Some(_) => {
            let server = PhraseServer::new(config, log)?;
            server.post_phrases(&phrases).await?;
            println!("💾 已写回 {} 个短语", phrases.len());
        }
        None => println!("⚠️  配置中没有用户，不写回服务器"),
    }
    Ok(())
}

async fn sync(config: &Config, log: Arc<RunLog>) -> Result<()> {
    log.section("开始检查新短语...");
    let server = PhraseServer::new(config, log.clone())?;
    let users: Vec<String> = server.users().map(str::to_string).collect();
    if users.is_empty() {
        println!("⚠️  配置中没有用户");
        return Ok(());
    }

    let dictionary = load_dictionary(config, &log)?;
    for user in users {
        println!("🔍 检查用户 {} 的新短语...", user);
        let mut maker = make_flashcard_maker(config, dictionary.clone(), log.clone()).await?;
        match maker.sync_user(&server, &user).await {
            Ok(0) => println!("  ✅ 没有新短语"),
            Ok(count) => println!("  ✅ 已处理 {} 个短语", count),
            Err(e) => {
                log.line(format!("用户 {} 同步失败: {}", user, e));
                println!("  ❌ 同步失败: {}", e);
            }
        }
    }

    println!("🎉 检查完成！");
    Ok(())
}
