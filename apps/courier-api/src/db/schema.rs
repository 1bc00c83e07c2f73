diesel::table! {
    messages (id) {
        id -> Int8,
        content -> Text,
        created_at -> Timestamptz,
        sequence_number -> Int4,
    }
}
