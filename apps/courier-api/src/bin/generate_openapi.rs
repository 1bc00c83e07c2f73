use utoipa::OpenApi;

fn main() {
    let spec = courier_api::routes::ApiDoc::openapi().to_pretty_json().unwrap();
    println!("{spec}");
}
