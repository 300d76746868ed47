//! 把牌组写成 Anki 可导入的 .apkg
//!
//! .apkg 是一个 zip，包含 SQLite 格式的 collection.anki2 和一个 media 映射文件。

use anyhow::{Context, Result};
use scraper::Html;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::deck::{Deck, NoteModel, BACK_TEMPLATE, CARD_TEMPLATE_NAME, FIELD_NAMES, FRONT_TEMPLATE};

const COLLECTION_FILE: &str = "collection.anki2";
const MEDIA_FILE: &str = "media";
// Anki 2.1 之前的集合格式版本
const SCHEMA_VERSION: i64 = 11;
const FIELD_SEPARATOR: &str = "\u{1f}";

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE col (
        id integer primary key,
        crt integer not null,
        mod integer not null,
        scm integer not null,
        ver integer not null,
        dty integer not null,
        usn integer not null,
        ls integer not null,
        conf text not null,
        models text not null,
        decks text not null,
        dconf text not null,
        tags text not null
    )"#,
    r#"CREATE TABLE notes (
        id integer primary key,
        guid text not null,
        mid integer not null,
        mod integer not null,
        usn integer not null,
        tags text not null,
        flds text not null,
        sfld integer not null,
        csum integer not null,
        flags integer not null,
        data text not null
    )"#,
    r#"CREATE TABLE cards (
        id integer primary key,
        nid integer not null,
        did integer not null,
        ord integer not null,
        mod integer not null,
        usn integer not null,
        type integer not null,
        queue integer not null,
        due integer not null,
        ivl integer not null,
        factor integer not null,
        reps integer not null,
        lapses integer not null,
        left integer not null,
        odue integer not null,
        odid integer not null,
        flags integer not null,
        data text not null
    )"#,
    r#"CREATE TABLE revlog (
        id integer primary key,
        cid integer not null,
        usn integer not null,
        ease integer not null,
        ivl integer not null,
        lastIvl integer not null,
        factor integer not null,
        time integer not null,
        type integer not null
    )"#,
    "CREATE TABLE graves (usn integer not null, oid integer not null, type integer not null)",
    "CREATE INDEX ix_notes_usn on notes (usn)",
    "CREATE INDEX ix_cards_usn on cards (usn)",
    "CREATE INDEX ix_revlog_usn on revlog (usn)",
    "CREATE INDEX ix_cards_nid on cards (nid)",
    "CREATE INDEX ix_cards_sched on cards (did, queue, due)",
    "CREATE INDEX ix_revlog_cid on revlog (cid)",
    "CREATE INDEX ix_notes_csum on notes (csum)",
];

pub struct PackageWriter<'a> {
    model: &'a NoteModel,
}

impl<'a> PackageWriter<'a> {
    pub fn new(model: &'a NoteModel) -> Self {
        PackageWriter { model }
    }

    /// 写出 .apkg。集合数据库先写到旁边的临时文件，打包后删除。
    pub async fn write(&self, deck: &Deck, path: &Path) -> Result<()> {
        let collection_path = PathBuf::from(format!("{}.anki2", path.display()));
        if collection_path.exists() {
            std::fs::remove_file(&collection_path)?;
        }

        let result = async {
            self.write_collection(deck, &collection_path).await?;
            bundle(&collection_path, path)
        }
        .await;

        let _ = std::fs::remove_file(&collection_path);
        result
    }

    async fn write_collection(&self, deck: &Deck, db_path: &Path) -> Result<()> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("无法创建集合数据库 {}", db_path.display()))?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let now = chrono::Local::now();
        let now_secs = now.timestamp();
        let now_millis = now.timestamp_millis();

        sqlx::query(
            "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags)
             VALUES (1, ?, ?, ?, ?, 0, 0, 0, ?, ?, ?, ?, '{}')",
        )
        .bind(now_secs)
        .bind(now_millis)
        .bind(now_millis)
        .bind(SCHEMA_VERSION)
        .bind(collection_conf(deck, self.model).to_string())
        .bind(models_json(self.model, deck, now_secs).to_string())
        .bind(decks_json(deck, now_secs).to_string())
        .bind(dconf_json().to_string())
        .execute(&pool)
        .await?;

        for (i, note) in deck.notes.iter().enumerate() {
            let note_id = now_millis + i as i64;
            let fields = note.fields();
            sqlx::query(
                "INSERT INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data)
                 VALUES (?, ?, ?, ?, -1, '', ?, ?, ?, 0, '')",
            )
            .bind(note_id)
            .bind(note.guid())
            .bind(self.model.id)
            .bind(now_secs)
            .bind(fields.join(FIELD_SEPARATOR))
            .bind(fields[0])
            .bind(field_checksum(fields[0]))
            .execute(&pool)
            .await?;

            // 每个笔记只有一张卡片，新卡片按加入顺序排列
            sqlx::query(
                "INSERT INTO cards (id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, lapses, left, odue, odid, flags, data)
                 VALUES (?, ?, ?, 0, ?, -1, 0, 0, ?, 0, 0, 0, 0, 0, 0, 0, 0, '')",
            )
            .bind(note_id)
            .bind(note_id)
            .bind(deck.id)
            .bind(now_secs)
            .bind(i as i64 + 1)
            .execute(&pool)
            .await?;
        }

        pool.close().await;
        Ok(())
    }
}

// 打包成 zip：集合数据库 + 空的 media 映射
fn bundle(collection_path: &Path, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("无法创建 {}", path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(COLLECTION_FILE, options)?;
    let mut collection = File::open(collection_path)?;
    std::io::copy(&mut collection, &mut zip)?;

    zip.start_file(MEDIA_FILE, options)?;
    zip.write_all(b"{}")?;

    zip.finish()?;
    Ok(())
}

/// 排序字段的校验和：去掉 HTML 后 SHA1 的前 8 位十六进制
pub fn field_checksum(field: &str) -> i64 {
    let digest = Sha1::digest(strip_html(field).as_bytes());
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(prefix) as i64
}

// 和 Anki 一样按 HTML 片段解析，只保留文本，实体也会还原
fn strip_html(text: &str) -> String {
    Html::parse_fragment(text).root_element().text().collect()
}

fn collection_conf(deck: &Deck, model: &NoteModel) -> Value {
    json!({
        "activeDecks": [1],
        "curDeck": deck.id,
        "newSpread": 0,
        "collapseTime": 1200,
        "timeLim": 0,
        "estTimes": true,
        "dueCounts": true,
        "curModel": model.id.to_string(),
        "nextPos": deck.notes.len() + 1,
        "sortType": "noteFld",
        "sortBackwards": false,
        "addToCur": true
    })
}

fn models_json(model: &NoteModel, deck: &Deck, now_secs: i64) -> Value {
    let fields: Vec<Value> = FIELD_NAMES
        .iter()
        .enumerate()
        .map(|(ord, name)| {
            json!({
                "name": name,
                "ord": ord,
                "sticky": false,
                "rtl": false,
                "font": "Arial",
                "size": 20,
                "media": []
            })
        })
        .collect();

    let mut models = serde_json::Map::new();
    models.insert(
        model.id.to_string(),
        json!({
            "id": model.id,
            "name": model.name,
            "type": 0,
            "mod": now_secs,
            "usn": -1,
            "sortf": 0,
            "did": deck.id,
            "tmpls": [{
                "name": CARD_TEMPLATE_NAME,
                "ord": 0,
                "qfmt": FRONT_TEMPLATE,
                "afmt": BACK_TEMPLATE,
                "did": null,
                "bqfmt": "",
                "bafmt": ""
            }],
            "flds": fields,
            "css": ".card {\n font-family: arial;\n font-size: 20px;\n text-align: center;\n color: black;\n background-color: white;\n}\n",
            "latexPre": "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n",
            "latexPost": "\\end{document}",
            "tags": [],
            "vers": [],
            "req": [[0, "any", [0]]]
        }),
    );
    Value::Object(models)
}

fn deck_entry(id: i64, name: &str, now_secs: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "desc": "",
        "mod": now_secs,
        "usn": -1,
        "collapsed": false,
        "newToday": [0, 0],
        "revToday": [0, 0],
        "lrnToday": [0, 0],
        "timeToday": [0, 0],
        "dyn": 0,
        "conf": 1,
        "extendNew": 10,
        "extendRev": 50
    })
}

fn decks_json(deck: &Deck, now_secs: i64) -> Value {
    let mut decks = serde_json::Map::new();
    decks.insert("1".to_string(), deck_entry(1, "Default", now_secs));
    decks.insert(deck.id.to_string(), deck_entry(deck.id, &deck.name, now_secs));
    Value::Object(decks)
}

fn dconf_json() -> Value {
    json!({
        "1": {
            "id": 1,
            "name": "Default",
            "mod": 0,
            "usn": 0,
            "maxTaken": 60,
            "autoplay": true,
            "timer": 0,
            "replayq": true,
            "dyn": false,
            "new": {
                "bury": true,
                "delays": [1, 10],
                "initialFactor": 2500,
                "ints": [1, 4, 7],
                "order": 1,
                "perDay": 20,
                "separate": true
            },
            "rev": {
                "bury": true,
                "ease4": 1.3,
                "fuzz": 0.05,
                "ivlFct": 1,
                "maxIvl": 36500,
                "minSpace": 1,
                "perDay": 100
            },
            "lapse": {
                "delays": [10],
                "leechAction": 0,
                "leechFails": 8,
                "minInt": 1,
                "mult": 0
            }
        }
    })
}
