//! Example: random actions on the default climbing course

use rand::rngs::StdRng;
use rand::SeedableRng;

use climb_rl_core::{ClimbAction, DiscreteSpace, Environment, Episode};
use climb_rl_env::{ClimbingEnvironment, CourseConfig, KinematicWorld, TraceRenderer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut env = ClimbingEnvironment::new(CourseConfig::default(), KinematicWorld::new())?
        .with_renderer(Box::new(TraceRenderer::new()));
    let space = DiscreteSpace::climb();
    let mut rng = StdRng::seed_from_u64(7);

    let num_episodes = 10;
    let mut episodes = Vec::with_capacity(num_episodes);

    for index in 0..num_episodes {
        env.reset().await?;
        let mut episode = Episode::begin(index);

        loop {
            let action = ClimbAction::try_from(space.sample(&mut rng))?;
            let step = env.step(action).await?;
            episode.record(&step);
            if step.done {
                break;
            }
        }

        println!(
            "Episode {}: reward = {:.2}, steps = {}, highest zone = {:?}, end = {:?}",
            index + 1,
            episode.total_reward,
            episode.steps,
            episode.highest_zone,
            episode.termination
        );
        episodes.push(episode);
    }

    let avg_reward =
        episodes.iter().map(|e| e.total_reward).sum::<f32>() / episodes.len() as f32;
    println!("\nAverage reward over {num_episodes} episodes: {avg_reward:.2}");

    env.close().await?;
    Ok(())
}
