// Subscription and client identifiers

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
