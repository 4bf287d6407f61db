//! Initial database migration.
//!
//! Creates all enum types, tables, and indexes for the wallet ledger.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ENUMS
        // ============================================================
        db.execute_unprepared(ENUMS_SQL).await?;

        // ============================================================
        // PART 2: WALLETS & ACCOUNTS
        // ============================================================
        db.execute_unprepared(WALLETS_SQL).await?;
        db.execute_unprepared(ACCOUNTS_SQL).await?;
        db.execute_unprepared(EXTERNAL_IDENTITIES_SQL).await?;

        // ============================================================
        // PART 3: JOURNAL
        // ============================================================
        db.execute_unprepared(JOURNAL_ENTRIES_SQL).await?;
        db.execute_unprepared(JOURNAL_LINES_SQL).await?;

        // ============================================================
        // PART 4: STATE MACHINES
        // ============================================================
        db.execute_unprepared(HOLDS_SQL).await?;
        db.execute_unprepared(PAYMENT_INTENTS_SQL).await?;
        db.execute_unprepared(REFUNDS_SQL).await?;

        // ============================================================
        // PART 5: API KEYS & IDEMPOTENCY
        // ============================================================
        db.execute_unprepared(API_KEYS_SQL).await?;
        db.execute_unprepared(IDEMPOTENCY_RECORDS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ENUMS_SQL: &str = r"
CREATE TYPE entry_kind AS ENUM (
    'deposit',
    'transfer',
    'hold',
    'capture',
    'release',
    'refund',
    'intent_pay'
);

CREATE TYPE line_side AS ENUM ('debit', 'credit');

CREATE TYPE line_bucket AS ENUM ('available', 'held');

CREATE TYPE account_type AS ENUM ('user', 'system');

CREATE TYPE account_status AS ENUM ('active', 'frozen');

CREATE TYPE hold_status AS ENUM (
    'active',
    'partially_captured',
    'captured',
    'released',
    'expired'
);

CREATE TYPE intent_status AS ENUM ('pending', 'paid', 'expired', 'cancelled');

CREATE TYPE refund_status AS ENUM ('posted', 'failed');

CREATE TYPE idempotency_status AS ENUM ('in_flight', 'completed', 'failed');

CREATE TYPE api_key_status AS ENUM ('active', 'revoked');
";

const WALLETS_SQL: &str = r"
CREATE TABLE wallets (
    id UUID PRIMARY KEY,
    handle VARCHAR(64),
    display_name VARCHAR(256) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX idx_wallets_handle ON wallets (handle) WHERE handle IS NOT NULL;
";

const ACCOUNTS_SQL: &str = r"
CREATE TABLE accounts (
    id UUID PRIMARY KEY,
    wallet_id UUID NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
    currency VARCHAR(3) NOT NULL,
    account_type account_type NOT NULL DEFAULT 'user',
    status account_status NOT NULL DEFAULT 'active',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT uq_accounts_wallet_currency UNIQUE (wallet_id, currency)
);

CREATE INDEX idx_accounts_wallet ON accounts (wallet_id);
";

const EXTERNAL_IDENTITIES_SQL: &str = r"
CREATE TABLE external_identities (
    id UUID PRIMARY KEY,
    provider VARCHAR(64) NOT NULL,
    external_ref VARCHAR(256) NOT NULL,
    wallet_id UUID NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT uq_external_identities UNIQUE (provider, external_ref)
);
";

const JOURNAL_ENTRIES_SQL: &str = r"
CREATE TABLE journal_entries (
    id UUID PRIMARY KEY,
    kind entry_kind NOT NULL,
    initiator_wallet_id UUID NOT NULL,
    reference_id VARCHAR(256),
    metadata JSONB NOT NULL DEFAULT '{}',
    idempotency_key VARCHAR(256),
    linked_entry_id UUID REFERENCES journal_entries(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_journal_entries_initiator ON journal_entries (initiator_wallet_id);
CREATE INDEX idx_journal_entries_linked ON journal_entries (linked_entry_id)
    WHERE linked_entry_id IS NOT NULL;
";

const JOURNAL_LINES_SQL: &str = r"
CREATE TABLE journal_lines (
    id UUID PRIMARY KEY,
    entry_id UUID NOT NULL REFERENCES journal_entries(id) ON DELETE RESTRICT,
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE RESTRICT,
    side line_side NOT NULL,
    bucket line_bucket NOT NULL,
    amount_minor BIGINT NOT NULL,
    currency VARCHAR(3) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT ck_journal_lines_amount_positive CHECK (amount_minor > 0)
);

CREATE INDEX idx_journal_lines_entry ON journal_lines (entry_id);
CREATE INDEX idx_journal_lines_account ON journal_lines (account_id, created_at);
CREATE INDEX idx_journal_lines_account_bucket ON journal_lines (account_id, bucket, side);
";

const HOLDS_SQL: &str = r"
CREATE TABLE holds (
    id UUID PRIMARY KEY,
    account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE RESTRICT,
    currency VARCHAR(3) NOT NULL,
    amount_minor BIGINT NOT NULL,
    remaining_minor BIGINT NOT NULL,
    status hold_status NOT NULL DEFAULT 'active',
    expires_at TIMESTAMPTZ NOT NULL,
    entry_id UUID NOT NULL REFERENCES journal_entries(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT ck_holds_amount_positive CHECK (amount_minor > 0),
    CONSTRAINT ck_holds_remaining_bounds
        CHECK (remaining_minor >= 0 AND remaining_minor <= amount_minor)
);

CREATE INDEX idx_holds_account ON holds (account_id);
CREATE INDEX idx_holds_status_expiry ON holds (status, expires_at);
";

const PAYMENT_INTENTS_SQL: &str = r"
CREATE TABLE payment_intents (
    id UUID PRIMARY KEY,
    payee_account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE RESTRICT,
    currency VARCHAR(3) NOT NULL,
    amount_minor BIGINT NOT NULL,
    status intent_status NOT NULL DEFAULT 'pending',
    expires_at TIMESTAMPTZ NOT NULL,
    metadata JSONB NOT NULL DEFAULT '{}',
    payer_account_id UUID REFERENCES accounts(id) ON DELETE SET NULL,
    paid_entry_id UUID REFERENCES journal_entries(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT ck_payment_intents_amount_positive CHECK (amount_minor > 0)
);

CREATE INDEX idx_payment_intents_payee ON payment_intents (payee_account_id);
CREATE INDEX idx_payment_intents_status_expiry ON payment_intents (status, expires_at);
";

const REFUNDS_SQL: &str = r"
CREATE TABLE refunds (
    id UUID PRIMARY KEY,
    capture_entry_id UUID NOT NULL REFERENCES journal_entries(id) ON DELETE RESTRICT,
    amount_minor BIGINT NOT NULL,
    currency VARCHAR(3) NOT NULL,
    status refund_status NOT NULL DEFAULT 'posted',
    entry_id UUID NOT NULL REFERENCES journal_entries(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT ck_refunds_amount_positive CHECK (amount_minor > 0)
);

CREATE INDEX idx_refunds_capture ON refunds (capture_entry_id);
";

const API_KEYS_SQL: &str = r"
CREATE TABLE api_keys (
    id UUID PRIMARY KEY,
    key_digest VARCHAR(64) NOT NULL UNIQUE,
    key_prefix VARCHAR(16) NOT NULL,
    wallet_id UUID NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
    scopes JSONB NOT NULL DEFAULT '[]',
    per_tx_max BIGINT,
    window_max BIGINT,
    status api_key_status NOT NULL DEFAULT 'active',
    last_used_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_api_keys_wallet ON api_keys (wallet_id);
";

const IDEMPOTENCY_RECORDS_SQL: &str = r"
CREATE TABLE idempotency_records (
    id UUID PRIMARY KEY,
    api_key_id UUID NOT NULL REFERENCES api_keys(id) ON DELETE CASCADE,
    idempotency_key VARCHAR(256) NOT NULL,
    fingerprint VARCHAR(64) NOT NULL,
    status idempotency_status NOT NULL DEFAULT 'in_flight',
    snapshot JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),

    CONSTRAINT uq_idempotency_scope UNIQUE (api_key_id, idempotency_key)
);
";

const DROP_ALL_SQL: &str = r"
DROP TABLE IF EXISTS idempotency_records;
DROP TABLE IF EXISTS api_keys;
DROP TABLE IF EXISTS refunds;
DROP TABLE IF EXISTS payment_intents;
DROP TABLE IF EXISTS holds;
DROP TABLE IF EXISTS journal_lines;
DROP TABLE IF EXISTS journal_entries;
DROP TABLE IF EXISTS external_identities;
DROP TABLE IF EXISTS accounts;
DROP TABLE IF EXISTS wallets;

DROP TYPE IF EXISTS api_key_status;
DROP TYPE IF EXISTS idempotency_status;
DROP TYPE IF EXISTS refund_status;
DROP TYPE IF EXISTS intent_status;
DROP TYPE IF EXISTS hold_status;
DROP TYPE IF EXISTS account_status;
DROP TYPE IF EXISTS account_type;
DROP TYPE IF EXISTS line_bucket;
DROP TYPE IF EXISTS line_side;
DROP TYPE IF EXISTS entry_kind;
";
