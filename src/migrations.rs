pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS handles (
      id INTEGER PRIMARY KEY,
      identifier TEXT NOT NULL,
      service TEXT,
      normalized_identity TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_handles_normalized_identity
      ON handles(normalized_identity);

    CREATE TABLE IF NOT EXISTS messages (
      id INTEGER PRIMARY KEY,
      guid TEXT NOT NULL,
      handle_id INTEGER,
      timestamp INTEGER NOT NULL DEFAULT 0,
      is_from_me INTEGER NOT NULL DEFAULT 0,
      raw_text TEXT,
      extracted_text TEXT,
      tokenized_text TEXT,
      has_attachments INTEGER NOT NULL DEFAULT 0,
      deleted_at INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_messages_handle_id ON messages(handle_id);

    CREATE TABLE IF NOT EXISTS attachments (
      id INTEGER PRIMARY KEY,
      guid TEXT NOT NULL,
      filename TEXT,
      mime_type TEXT,
      size INTEGER
    );

    CREATE TABLE IF NOT EXISTS message_attachments (
      id INTEGER PRIMARY KEY,
      message_id INTEGER NOT NULL,
      attachment_id INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_message_attachments_message_id
      ON message_attachments(message_id);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
      phone_normalized TEXT PRIMARY KEY,
      name TEXT,
      organization TEXT,
      phone_raw TEXT
    );

    CREATE TABLE IF NOT EXISTS sender_aliases (
      phone_normalized TEXT PRIMARY KEY,
      alias TEXT NOT NULL,
      created_at INTEGER NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_watermarks (
      table_name TEXT PRIMARY KEY,
      last_cursor INTEGER NOT NULL DEFAULT 0,
      last_sync_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS push_watermarks (
      endpoint TEXT PRIMARY KEY,
      last_cursor INTEGER NOT NULL DEFAULT 0,
      last_push_at INTEGER,
      total_pushed INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS meta (
      key TEXT PRIMARY KEY,
      value TEXT
    );
    "#,
    r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS message_fts USING fts5(
      extracted_text,
      content='messages',
      content_rowid='id',
      tokenize='trigram'
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS message_fts_syllable USING fts5(
      tokenized_text,
      content='messages',
      content_rowid='id',
      tokenize='unicode61 remove_diacritics 0'
    );
    "#,
];
