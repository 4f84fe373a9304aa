use sqlx::{PgPool, Postgres, QueryBuilder};

use super::MAX_ROWS_PER_STATEMENT;
use crate::domain::ImageRecord;

/// Insert all images, one statement per chunk. Returns the number of rows written.
///
/// Chunks are not wrapped in a transaction; a failure part-way leaves earlier chunks in place.
pub async fn insert_images(pool: &PgPool, images: &[ImageRecord]) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;
    for chunk in images.chunks(MAX_ROWS_PER_STATEMENT) {
        let mut builder = QueryBuilder::<Postgres>::new("INSERT INTO images (depth, data) ");
        builder.push_values(chunk, |mut b, image| {
            b.push_bind(image.depth).push_bind(&image.pixels);
        });

        inserted += builder.build().execute(pool).await?.rows_affected();
    }

    Ok(inserted)
}

/// Fetch every image whose depth lies in `[depth_min, depth_max]`.
pub async fn images_in_depth_range(
    pool: &PgPool,
    depth_min: f64,
    depth_max: f64,
) -> Result<Vec<ImageRecord>, sqlx::Error> {
    sqlx::query_as::<_, ImageRecord>(
        r#"
        SELECT
            depth,
            data AS pixels
        FROM images
        WHERE depth >= $1
          AND depth <= $2
        "#,
    )
    .bind(depth_min)
    .bind(depth_max)
    .fetch_all(pool)
    .await
}
