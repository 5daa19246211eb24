//! Postgres schema.
//!
//! Idempotent DDL, applied in order on startup. Row-level security scopes
//! every project-bearing table by the `app.current_project` session setting;
//! `set_project_context` installs it transaction-locally so pooled
//! connections never leak a scope.

/// Ordered, idempotent migration statements
pub const MIGRATIONS: &[&str] = &[
    // Extensions
    "CREATE EXTENSION IF NOT EXISTS vector",
    // Session-scoped project context; transaction-local so the setting dies
    // with the transaction and pooled connections come back clean.
    r#"
    CREATE OR REPLACE FUNCTION set_project_context(p_project text) RETURNS void AS $$
        SELECT set_config('app.current_project', p_project, true)
    $$ LANGUAGE sql
    "#,
    // Nodes
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id          uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        project_id  text NOT NULL,
        name        text NOT NULL,
        label       text NOT NULL DEFAULT '',
        properties  jsonb NOT NULL DEFAULT '{}'::jsonb,
        vector_id   uuid,
        UNIQUE (project_id, name)
    )
    "#,
    // Edges
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        id            uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        project_id    text NOT NULL,
        source_id     uuid NOT NULL REFERENCES nodes(id),
        target_id     uuid NOT NULL REFERENCES nodes(id),
        relation      text NOT NULL,
        weight        double precision NOT NULL DEFAULT 1.0,
        properties    jsonb NOT NULL DEFAULT '{}'::jsonb,
        memory_sector varchar(20) NOT NULL DEFAULT 'semantic',
        created_at    timestamptz NOT NULL DEFAULT now(),
        modified_at   timestamptz NOT NULL DEFAULT now(),
        last_accessed timestamptz,
        last_engaged  timestamptz,
        access_count  int NOT NULL DEFAULT 0,
        UNIQUE (project_id, source_id, target_id, relation)
    )
    "#,
    // Insights
    r#"
    CREATE TABLE IF NOT EXISTS l2_insights (
        id              uuid PRIMARY KEY DEFAULT gen_random_uuid(),
        project_id      text NOT NULL,
        content         text NOT NULL,
        embedding       vector(1536),
        source_ids      int[] NOT NULL DEFAULT '{}',
        memory_strength double precision NOT NULL DEFAULT 0.5,
        metadata        jsonb NOT NULL DEFAULT '{}'::jsonb,
        is_deleted      boolean NOT NULL DEFAULT false,
        deleted_at      timestamptz,
        deleted_by      text,
        deleted_reason  text
    )
    "#,
    // Proposals
    r#"
    CREATE TABLE IF NOT EXISTS smf_proposals (
        id               uuid PRIMARY KEY,
        project_id       text NOT NULL,
        trigger_type     text NOT NULL,
        proposed_action  jsonb NOT NULL,
        affected_edges   uuid[] NOT NULL DEFAULT '{}',
        reasoning        text NOT NULL DEFAULT '',
        approval_level   text NOT NULL DEFAULT 'io',
        status           text NOT NULL DEFAULT 'PENDING',
        approved_by_io   boolean NOT NULL DEFAULT false,
        approved_by_ethr boolean NOT NULL DEFAULT false,
        created_at       timestamptz NOT NULL DEFAULT now(),
        resolved_at      timestamptz,
        resolved_by      text,
        undo_deadline    timestamptz,
        metadata         jsonb NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    // Audit log (append-only)
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id         bigserial PRIMARY KEY,
        timestamp  timestamptz NOT NULL DEFAULT now(),
        actor      text NOT NULL,
        action     text NOT NULL,
        target_id  text,
        project_id text NOT NULL,
        payload    jsonb NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    // Cost accounting
    r#"
    CREATE TABLE IF NOT EXISTS api_cost_log (
        id             bigserial PRIMARY KEY,
        date           date NOT NULL,
        api_name       text NOT NULL,
        num_calls      int NOT NULL DEFAULT 1,
        token_count    bigint NOT NULL DEFAULT 0,
        estimated_cost double precision NOT NULL DEFAULT 0,
        created_at     timestamptz NOT NULL DEFAULT now()
    )
    "#,
    // Retry outcomes
    r#"
    CREATE TABLE IF NOT EXISTS api_retry_log (
        id          bigserial PRIMARY KEY,
        api_name    text NOT NULL,
        error_type  text NOT NULL,
        retry_count int NOT NULL,
        success     boolean NOT NULL,
        created_at  timestamptz NOT NULL DEFAULT now()
    )
    "#,
    // Budget alerts
    r#"
    CREATE TABLE IF NOT EXISTS budget_alerts (
        id                   bigserial PRIMARY KEY,
        alert_date           date NOT NULL,
        alert_type           text NOT NULL,
        projected_cost       double precision NOT NULL,
        budget_limit         double precision NOT NULL,
        utilization_pct      double precision NOT NULL,
        alert_sent           boolean NOT NULL DEFAULT false,
        notification_methods text[] NOT NULL DEFAULT '{}',
        created_at           timestamptz NOT NULL DEFAULT now()
    )
    "#,
    // Dual-judge ground truth (evaluation pipelines write here)
    r#"
    CREATE TABLE IF NOT EXISTS ground_truth (
        id           bigserial PRIMARY KEY,
        query_id     text NOT NULL,
        judge1_score double precision NOT NULL,
        judge2_score double precision NOT NULL,
        judge1_model text NOT NULL,
        judge2_model text NOT NULL,
        kappa        double precision,
        metadata     jsonb NOT NULL DEFAULT '{}'::jsonb,
        created_at   timestamptz NOT NULL DEFAULT now()
    )
    "#,
    // Composite indexes, project first
    "CREATE INDEX IF NOT EXISTS idx_nodes_project_name ON nodes (project_id, name)",
    "CREATE INDEX IF NOT EXISTS idx_edges_project_source ON edges (project_id, source_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_project_target ON edges (project_id, target_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_project_modified ON edges (project_id, modified_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_insights_project ON l2_insights (project_id, is_deleted)",
    "CREATE INDEX IF NOT EXISTS idx_proposals_project_status ON smf_proposals (project_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_cost_log_date ON api_cost_log (date, api_name)",
    // Row-level security: SELECT/INSERT/UPDATE/DELETE scoped by the session
    // project; INSERT WITH CHECK rejects rows for a different project.
    "ALTER TABLE nodes ENABLE ROW LEVEL SECURITY",
    "ALTER TABLE edges ENABLE ROW LEVEL SECURITY",
    "ALTER TABLE l2_insights ENABLE ROW LEVEL SECURITY",
    "ALTER TABLE smf_proposals ENABLE ROW LEVEL SECURITY",
    r#"
    DO $$ BEGIN
        IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE policyname = 'nodes_project_scope') THEN
            CREATE POLICY nodes_project_scope ON nodes
                USING (project_id = current_setting('app.current_project', true))
                WITH CHECK (project_id = current_setting('app.current_project', true));
        END IF;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE policyname = 'edges_project_scope') THEN
            CREATE POLICY edges_project_scope ON edges
                USING (project_id = current_setting('app.current_project', true))
                WITH CHECK (project_id = current_setting('app.current_project', true));
        END IF;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE policyname = 'insights_project_scope') THEN
            CREATE POLICY insights_project_scope ON l2_insights
                USING (project_id = current_setting('app.current_project', true))
                WITH CHECK (project_id = current_setting('app.current_project', true));
        END IF;
    END $$
    "#,
    r#"
    DO $$ BEGIN
        IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE policyname = 'proposals_project_scope') THEN
            CREATE POLICY proposals_project_scope ON smf_proposals
                USING (project_id = current_setting('app.current_project', true))
                WITH CHECK (project_id = current_setting('app.current_project', true));
        END IF;
    END $$
    "#,
];

// ============================================================================
// TESTS
// ============================================================================
