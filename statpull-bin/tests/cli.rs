#[cfg(test)]
mod cli {
    use assert_cmd::Command;
    use assert_cmd::cargo::cargo_bin_cmd;
    use http::StatusCode;
    use predicates::str::contains;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::{TempDir, tempdir};
    use test_utils::mount_json;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    /// Command running in an empty directory, so that no `statpull.toml`
    /// of the developer is picked up
    fn main_command(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!();
        cmd.current_dir(dir.path())
            .env_remove("STATPULL_BASE_URL")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Serve a team whose only match was played against `opponent`
    async fn mount_team(server: &MockServer, id: u64, opponent: u64) {
        let (home, away) = (id.min(opponent), id.max(opponent));
        mount_json!(
            server,
            format!("/teams/{id}"),
            json!({"id": id, "name": format!("team-{id}"), "region": "EU"})
        );
        mount_json!(
            server,
            format!("/teams/{id}/matches"),
            json!([{
                "id": home * 100 + away,
                "home_id": home,
                "away_id": away,
                "score": "16-14",
                "stats": [
                    {"player_id": home * 10, "player": format!("p{home}"), "kills": 20},
                    {"player_id": away * 10, "player": format!("p{away}"), "kills": 18}
                ]
            }])
        );
    }

    #[tokio::test]
    async fn test_json_output_is_deduplicated() -> Result<()> {
        let server = MockServer::start().await;
        mount_team(&server, 1, 2).await;
        mount_team(&server, 2, 1).await;
        let dir = tempdir()?;

        let output = main_command(&dir)
            .args(["--base-url", &server.uri(), "--format", "json", "1", "2", "1"])
            .output()?;
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(report["teams"].as_array().unwrap().len(), 2);
        assert_eq!(report["matches"].as_array().unwrap().len(), 1);
        assert_eq!(report["matches"][0]["id"], 102);
        assert_eq!(report["stats"].as_array().unwrap().len(), 2);
        assert_eq!(report["summary"]["processed"], 2);
        assert_eq!(report["summary"]["failed"], json!([]));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_team_exits_with_item_failure() -> Result<()> {
        let server = MockServer::start().await;
        mount_team(&server, 1, 2).await;
        Mock::given(path("/teams/9"))
            .respond_with(ResponseTemplate::new(StatusCode::NOT_FOUND.as_u16()))
            .mount(&server)
            .await;
        let dir = tempdir()?;

        main_command(&dir)
            .args(["--base-url", &server.uri(), "--mode", "plain", "1", "9"])
            .assert()
            .code(2)
            .stdout(contains("Could not collect 1 team."))
            .stdout(contains("no team data for `9`"))
            .stdout(contains("1 Teams 1 Matches 2 Stat lines"))
            .stdout(contains("1 OK"));
        Ok(())
    }

    #[tokio::test]
    async fn test_ids_from_file_and_output_file() -> Result<()> {
        let server = MockServer::start().await;
        mount_team(&server, 3, 4).await;
        mount_team(&server, 4, 3).await;
        let dir = tempdir()?;
        fs::write(dir.path().join("teams.txt"), "# finals\n3\n\n4\n")?;

        main_command(&dir)
            .args(["--base-url", &server.uri(), "--ids-from", "teams.txt"])
            .args(["--format", "json", "--output", "report.json"])
            .assert()
            .success();

        let report: Value = serde_json::from_str(&fs::read_to_string(
            dir.path().join("report.json"),
        )?)?;
        assert_eq!(report["teams"][0]["region"], "EU");
        assert_eq!(report["summary"]["processed"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_default_config_file_is_loaded() -> Result<()> {
        let server = MockServer::start().await;
        mount_team(&server, 1, 2).await;
        let dir = tempdir()?;
        fs::write(
            dir.path().join("statpull.toml"),
            format!("base_url = \"{}\"\nformat = \"json\"\nmax_calls = 50\n", server.uri()),
        )?;

        let output = main_command(&dir).arg("1").output()?;
        assert!(output.status.success());

        let report: Value = serde_json::from_slice(&output.stdout)?;
        assert_eq!(report["teams"][0]["name"], "team-1");
        Ok(())
    }

    #[test]
    fn test_invalid_config_file() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("custom.toml"), "max_call = 3\n")?;

        main_command(&dir)
            .args(["--config", "custom.toml", "1"])
            .assert()
            .code(3)
            .stderr(contains("Error while loading config"));
        Ok(())
    }

    #[test]
    fn test_missing_config_file() -> Result<()> {
        let dir = tempdir()?;

        main_command(&dir)
            .args(["--config", "does-not-exist.toml", "1"])
            .assert()
            .code(3)
            .stderr(contains("Cannot load configuration file"));
        Ok(())
    }

    #[test]
    fn test_no_team_ids() -> Result<()> {
        let dir = tempdir()?;

        main_command(&dir)
            .args(["--base-url", "http://127.0.0.1:1"])
            .assert()
            .code(1)
            .stderr(contains("No team ids given"));
        Ok(())
    }

    #[test]
    fn test_missing_base_url() -> Result<()> {
        let dir = tempdir()?;

        main_command(&dir)
            .arg("1")
            .assert()
            .code(1)
            .stderr(contains("No base URL given"));
        Ok(())
    }

    #[test]
    fn test_invalid_rate_limit() -> Result<()> {
        let dir = tempdir()?;

        main_command(&dir)
            .args(["--base-url", "http://127.0.0.1:1", "--max-calls", "0", "1"])
            .assert()
            .code(1)
            .stderr(contains("Invalid configuration"));
        Ok(())
    }

    #[test]
    fn test_help() {
        let dir = tempdir().unwrap();

        main_command(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(contains("--max-calls"))
            .stdout(contains("--ids-from"));
    }
}
