use sqlx::{PgPool, Postgres, QueryBuilder};

use super::MAX_ROWS_PER_STATEMENT;
use crate::domain::{PlantPercentage, PlantRecord, StateTotal};

pub async fn insert_plants(pool: &PgPool, plants: &[PlantRecord]) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;
    for chunk in plants.chunks(MAX_ROWS_PER_STATEMENT) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO plants (plant_name, state, net_generation, latitude, longitude) ",
        );
        builder.push_values(chunk, |mut b, p| {
            b.push_bind(&p.plant_name)
                .push_bind(&p.state)
                .push_bind(p.annual_net_generation)
                .push_bind(&p.latitude)
                .push_bind(&p.longitude);
        });

        inserted += builder.build().execute(pool).await?.rows_affected();
    }

    Ok(inserted)
}

/// Plants ordered by annual net generation, largest first.
pub async fn top_plants(pool: &PgPool, limit: i64) -> Result<Vec<PlantRecord>, sqlx::Error> {
    sqlx::query_as::<_, PlantRecord>(
        r#"
        SELECT
            plant_name,
            state,
            net_generation::float8 AS annual_net_generation,
            latitude,
            longitude
        FROM plants
        ORDER BY net_generation DESC, id
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn plants_in_state(pool: &PgPool, state: &str) -> Result<Vec<PlantRecord>, sqlx::Error> {
    sqlx::query_as::<_, PlantRecord>(
        r#"
        SELECT
            plant_name,
            state,
            net_generation::float8 AS annual_net_generation,
            latitude,
            longitude
        FROM plants
        WHERE state = $1
        ORDER BY id
        "#,
    )
    .bind(state)
    .fetch_all(pool)
    .await
}

/// Sum of net generation per state. Totals are not rounded here.
pub async fn state_totals(pool: &PgPool) -> Result<Vec<StateTotal>, sqlx::Error> {
    sqlx::query_as::<_, StateTotal>(
        r#"
        SELECT
            state,
            SUM(net_generation)::float8 AS total
        FROM plants
        GROUP BY state
        ORDER BY state
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Every plant joined with its state total and its share of that total.
pub async fn plant_percentages(pool: &PgPool) -> Result<Vec<PlantPercentage>, sqlx::Error> {
    sqlx::query_as::<_, PlantPercentage>(
        r#"
        SELECT
            p.plant_name,
            p.state,
            p.latitude,
            p.longitude,
            p.net_generation::float8 AS annual_net_generation,
            st.total_net_generation::float8 AS state_total_annual_net_generation,
            ROUND(p.net_generation / NULLIF(st.total_net_generation, 0) * 100, 2)::float8
                AS percentage
        FROM plants p
        JOIN (
            SELECT
                state,
                SUM(net_generation) AS total_net_generation
            FROM plants
            GROUP BY state
        ) st ON p.state = st.state
        ORDER BY p.net_generation DESC, p.id
        "#,
    )
    .fetch_all(pool)
    .await
}
