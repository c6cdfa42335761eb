//! Loader against a real PostgreSQL. Each test gets a fresh database with
//! the crate's migrations applied.

use chrono::{TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use etl::db::{self, PgSession};
use etl::load::{LoadOptions, Loader};
use etl::model::{administracion_id, titular_id, Envelope, NewAdministracion, NewTitular, NivelJerarquico};

fn admin(codigo: &str, padre: Option<&str>) -> Envelope {
    let nombre = format!("Órgano {}", codigo);
    Envelope::Administracion(NewAdministracion {
        id: administracion_id(Some(codigo), None, &nombre),
        nombre,
        codigo_oficial: Some(codigo.to_string()),
        ambito: Some("SERVICIO".to_string()),
        administracion_padre_codigo: padre.map(str::to_string),
        nivel_jerarquico: NivelJerarquico::Autonomico,
        tipo_organo: "SERVICIO".to_string(),
        orden_jerarquico: None,
        comunidad_autonoma_id: None,
        activa: true,
        valido_desde: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    })
}

fn titular(codigo: &str, nombre: &str, day: u32) -> Envelope {
    Envelope::Titular(NewTitular {
        id: titular_id(codigo, nombre, "Titular"),
        administracion_codigo: codigo.to_string(),
        nombre: nombre.to_string(),
        cargo: "Titular".to_string(),
        fecha_inicio: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
    })
}

async fn load(pool: &PgPool, envelopes: &[Envelope]) -> etl::Result<etl::load::LoadStats> {
    let session = PgSession::begin(pool).await?;
    Loader::new(session, LoadOptions::default()).load(envelopes).await
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
#[sqlx::test(migrations = "./migrations")]
async fn test_rerun_inserts_nothing_new(pool: PgPool) {
    let envelopes = vec![
        admin("D1", Some("C1")),
        admin("C1", None),
        titular("D1", "Ana Pérez", 1),
    ];

    let first = load(&pool, &envelopes).await.unwrap();
    assert_eq!(first.administraciones, 2);
    assert_eq!(first.titulares, 1);

    let second = load(&pool, &envelopes).await.unwrap();
    assert_eq!(second.loaded, 0);
    assert_eq!(second.unchanged, 3);

    assert_eq!(count(&pool, "administraciones").await, 2);
    assert_eq!(count(&pool, "administraciones_titulares").await, 1);

    let padre: Option<Uuid> = sqlx::query_scalar(
        "SELECT administracion_padre_id FROM administraciones WHERE codigo_oficial = 'D1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let c1: Uuid = sqlx::query_scalar("SELECT id FROM administraciones WHERE codigo_oficial = 'C1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(padre, Some(c1));
}

#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
#[sqlx::test(migrations = "./migrations")]
async fn test_constraint_violation_isolated_to_its_row(pool: PgPool) {
    sqlx::query("INSERT INTO administraciones (id, nombre, codigo_oficial) VALUES ($1, 'Previa', 'X1')")
        .bind(Uuid::from_u128(99))
        .execute(&pool)
        .await
        .unwrap();

    let stats = load(&pool, &[admin("X1", None), admin("X2", None), titular("X1", "Ana", 1)])
        .await
        .unwrap();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.administraciones, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(count(&pool, "administraciones").await, 2);
}

#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
#[sqlx::test(migrations = "./migrations")]
async fn test_child_of_rejected_parent_is_rejected(pool: PgPool) {
    sqlx::query("INSERT INTO administraciones (id, nombre, codigo_oficial) VALUES ($1, 'Previa', 'X1')")
        .bind(Uuid::from_u128(99))
        .execute(&pool)
        .await
        .unwrap();

    for admin_flush_every in [1, 100] {
        let session = PgSession::begin(&pool).await.unwrap();
        let options = LoadOptions {
            admin_flush_every,
            ..LoadOptions::default()
        };
        let stats = Loader::new(session, options)
            .load(&[admin("X1", None), admin("C", Some("X1")), admin("Z", None)])
            .await
            .unwrap();
        assert_eq!(stats.errors, 2, "flush every {}", admin_flush_every);
    }
    assert_eq!(count(&pool, "administraciones").await, 2);
}

#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
#[sqlx::test(migrations = "./migrations")]
async fn test_new_holder_closes_previous_term(pool: PgPool) {
    load(&pool, &[admin("X1", None), titular("X1", "Ana", 1)]).await.unwrap();
    load(&pool, &[admin("X1", None), titular("X1", "Luis", 15)]).await.unwrap();

    let open: Vec<String> = sqlx::query_scalar(
        "SELECT nombre FROM administraciones_titulares WHERE fecha_fin IS NULL",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(open, vec!["Luis".to_string()]);

    let fin: Option<chrono::DateTime<Utc>> = sqlx::query_scalar(
        "SELECT fecha_fin FROM administraciones_titulares WHERE nombre = 'Ana'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(fin, Some(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()));
}

#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
#[sqlx::test(migrations = "./migrations")]
async fn test_region_lookup_accepts_alternative_names(pool: PgPool) {
    sqlx::query(
        "INSERT INTO comunidades_autonomas (codigo_ine, nombre, nombre_oficial) \
         VALUES ('03', 'Principado de Asturias', 'Principado de Asturias')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let found = db::find_region(&pool, &["Asturias", "Principado de Asturias"])
        .await
        .unwrap();
    assert_eq!(found.map(|(_, nombre)| nombre), Some("Principado de Asturias".to_string()));
    assert!(db::find_region(&pool, &["Aragón"]).await.unwrap().is_none());
}
