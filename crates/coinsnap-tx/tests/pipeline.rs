//! End-to-end transform coverage: raw response -> normalize -> clean for
//! both dataset presets.

use chrono::NaiveDate;
use coinsnap_core::{ColumnType, DatasetSpec, RawResponse, Value};
use coinsnap_tx::{clean, normalize};
use serde_json::json;

fn response(body: serde_json::Value) -> RawResponse {
    serde_json::from_value(body).unwrap()
}

#[test]
fn price_history_response_to_snapshot() {
    let raw = response(json!({
        "data": [{
            "priceUsd": "16708.5235619029337193",
            "time": 1672617600000i64,
            "date": "2023-01-02T00:00:00.000Z",
        }],
        "timestamp": 1717156800000i64,
    }));
    let spec = DatasetSpec::price_history();

    let table = normalize(&raw, &spec.records_field, &spec.separator).unwrap();
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.columns(), ["priceUsd", "time", "date"]);

    let cleaned = clean(table, &spec).unwrap();
    assert_eq!(cleaned.columns(), ["priceUsd", "date"]);
    assert_eq!(cleaned.types(), [ColumnType::Float, ColumnType::Date]);
    assert_eq!(
        cleaned.rows()[0],
        vec![
            Value::Float(16708.52),
            Value::Date(NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()),
        ]
    );
}

#[test]
fn asset_listing_response_to_snapshot() {
    let raw = response(json!({
        "data": [
            {
                "id": "bitcoin",
                "rank": "1",
                "symbol": "BTC",
                "name": "Bitcoin",
                "supply": "19250335.0",
                "maxSupply": "21000000.0",
                "marketCapUsd": "321706124404.8463",
                "volumeUsd24Hr": "12822561919.978",
                "priceUsd": "16711.1053727871",
                "changePercent24Hr": "0.2545",
                "vwap24Hr": "16651.9",
                "explorer": "https://blockchain.info/",
            },
            {
                "id": "dogecoin",
                "rank": "8",
                "symbol": "DOGE",
                "name": "Dogecoin",
                "supply": "132670764299.9",
                "maxSupply": null,
                "marketCapUsd": "9307522783.5",
                "volumeUsd24Hr": "302954363.4",
                "priceUsd": "0.0701547",
                "changePercent24Hr": "-1.1",
                "vwap24Hr": "0.0707",
                "explorer": null,
            },
        ],
        "timestamp": 1717156800000i64,
    }));
    let spec = DatasetSpec::asset_listing();

    let table = normalize(&raw, &spec.records_field, &spec.separator).unwrap();
    assert_eq!(table.row_count(), 2);

    let cleaned = clean(table, &spec).unwrap();
    let columns = cleaned.columns();
    let col = |name: &str| columns.iter().position(|c| c == name).unwrap();

    // declared numeric columns coerced from their string renderings
    assert_eq!(cleaned.rows()[0][col("rank")], Value::Int(1));
    assert_eq!(cleaned.rows()[0][col("priceUsd")], Value::Float(16711.11));
    assert_eq!(
        cleaned.rows()[0][col("maxSupply")],
        Value::Float(21000000.0)
    );

    // nullable columns carry their fixed fallbacks
    assert_eq!(cleaned.rows()[1][col("maxSupply")], Value::Float(0.0));
    assert_eq!(
        cleaned.rows()[1][col("explorer")],
        Value::Str("not available".into())
    );

    // every fill-policy column is null-free
    for row in cleaned.rows() {
        assert!(!row[col("maxSupply")].is_null());
        assert!(!row[col("explorer")].is_null());
    }
}

#[test]
fn normalize_keeps_every_record_under_union_schema() {
    let raw = response(json!({
        "data": [
            {"id": "a", "info": {"url": "https://a.example"}},
            {"id": "b"},
            {"id": "c", "extra": 1},
        ],
        "timestamp": 1,
    }));
    let table = normalize(&raw, "data", ".").unwrap();

    assert_eq!(table.row_count(), 3);
    assert_eq!(table.columns(), ["id", "info.url", "extra"]);
    assert_eq!(table.rows()[1][1], Value::Null);
    assert_eq!(table.rows()[1][2], Value::Null);
}
