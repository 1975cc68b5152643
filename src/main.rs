use rocket::{Build, Rocket};
use tenant_auth::{Config, build_rocket};

#[rocket::launch]
fn rocket() -> Rocket<Build> {
    dotenvy::dotenv().ok();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    match build_rocket(config) {
        Ok(rocket) => rocket,
        Err(err) => {
            eprintln!("Failed to build server: {err}");
            std::process::exit(1);
        }
    }
}
